//! extprog core - attribute types, diagnostics, configuration and error handling
//!
//! Shared by the executor, the lifecycle orchestrator and the stateless query
//! runner. Nothing in here touches processes.

pub mod config;
pub mod diag;
pub mod error;
pub mod resource;
pub mod types;

pub use config::BridgeConfig;
pub use diag::{Diagnostic, Diagnostics, Severity};
pub use error::{Error, Result};
pub use resource::{ProgramOptions, ResourceData};
pub use types::*;
