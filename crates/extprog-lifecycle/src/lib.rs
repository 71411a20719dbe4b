//! extprog lifecycle - the stateful managed-resource protocol
//!
//! Synthesizes create/read/update/delete out of four external programs that
//! share nothing but a per-step interchange directory.

pub mod marshal;
pub mod orchestrator;

pub use orchestrator::ExternalResource;
