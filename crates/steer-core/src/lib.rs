//! Core types and utilities for the steering classifier.
//!
//! Shared by the dataset and training crates: the error taxonomy, the
//! sample and label types, run configuration and metric bookkeeping.

pub mod cli;
pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

pub use cli::*;
pub use config::*;
pub use error::{Error, Result};
pub use metrics::*;
pub use types::*;

pub mod prelude {
    pub use crate::config::*;
    pub use crate::error::{Error, Result};
    pub use crate::metrics::*;
    pub use crate::types::*;
}
