//! Epistat Core - Fundamental types
//!
//! This crate provides the core types used throughout Epistat:
//! - `RawValue`: a dataset cell as uploaded
//! - `Dataset` / `Record`: in-memory tabular data
//! - `EngineConfig`: tunable analysis constants
//! - `EpiError`: structured errors and warnings

mod value;
mod dataset;
mod config;
mod error;

pub use value::{RawValue, MISSING_TOKENS};
pub use dataset::{Dataset, Record};
pub use config::EngineConfig;
pub use error::{EpiError, ErrorContext, NumericError, Severity, codes};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Dataset, EngineConfig, EpiError, NumericError, RawValue, Record, Severity};
    pub use crate::error::codes;
}
