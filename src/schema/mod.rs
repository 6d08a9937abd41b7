//! Schema module - Configuration and result types for repair runs.

mod config;
mod result;

pub use config::*;
pub use result::*;
