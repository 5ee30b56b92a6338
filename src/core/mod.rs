//! Core business logic abstractions

pub mod config;
pub mod log;
pub mod numeric;
pub mod rate;
pub mod source;

// Re-export main types for cleaner imports
pub use numeric::{NumberFormat, parse_fixed3, parse_loose};
pub use rate::{Rate, RefreshMeta, RemoteSnapshot, Snapshot, SourceHealth};
pub use source::{RateSource, SourceId};
