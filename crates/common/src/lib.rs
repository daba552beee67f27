//! VideoKit Common Utilities
//!
//! Shared infrastructure for all VideoKit crates:
//! - Error taxonomy and result aliases
//! - Media time arithmetic (rational timestamps and ranges)
//! - Tracing/logging initialization
//! - Configuration loading
//! - Output location providers

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;
pub mod time;
pub mod track;

pub use config::*;
pub use error::*;
pub use paths::*;
pub use time::*;
pub use track::*;
