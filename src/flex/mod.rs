//! Flex transport adapter (C3): fetches Flex XML bytes and classifies
//! transport/statement-phase errors. Never interprets business content.

pub mod client;
pub mod codes;
pub mod retry;
pub mod xml;

pub use client::{FetchOutcome, FlexClient, PollAttempt};
pub use xml::{FlexDocument, FlexStatementRaw, SectionRaw};
