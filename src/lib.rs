//! extprog - run arbitrary external programs as data sources, ephemeral
//! resources and managed resources
//!
//! The component crates do the work; this crate names them and wires them
//! into a provider.

pub mod provider;

pub use extprog_core::{
    BridgeConfig, CommandSpec, Diagnostic, Diagnostics, Error, ProgramOptions, ResourceData, Result,
    Severity, Verb,
};
pub use extprog_lifecycle::ExternalResource;
pub use extprog_query::{DataSourceState, DynamicValue, ExternalDataSource, ExternalEphemeral, QueryConfig};
pub use provider::{
    create_default_provider, ComponentKind, ExternalProvider, LifecycleResource, QuerySource, TYPE_NAME,
};
