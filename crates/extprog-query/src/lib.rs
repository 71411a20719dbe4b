//! extprog query - the stateless read protocol
//!
//! A JSON object of strings goes in on stdin, a single JSON value comes back
//! on stdout. The data source accepts any JSON value; the ephemeral resource
//! keeps the older flat string-map contract.

pub mod protocol;
pub mod runner;

pub use protocol::{DynamicValue, QueryConfig, QueryResult, ResultContract};
pub use runner::{DataSourceState, ExternalDataSource, ExternalEphemeral, QueryRunner, DATA_SOURCE_ID};
