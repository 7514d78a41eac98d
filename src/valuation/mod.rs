//! Valuation & FX resolver (C7, `spec.md` §4.6). Two frozen ordered
//! source hierarchies, each a pure function over candidate inputs.

pub mod eod_mark;
pub mod fx;

pub use eod_mark::EodMarkResolution;
pub use fx::FxResolution;
