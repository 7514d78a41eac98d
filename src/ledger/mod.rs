//! FIFO ledger & daily snapshot (C8/C9, `spec.md` §4.8-§4.9).

pub mod fifo;
pub mod snapshot;

pub use fifo::{FifoResult, RealizedPnlEvent};
