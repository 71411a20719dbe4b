//! Query runner and the two components built on it.

use crate::protocol::{DynamicValue, QueryConfig, QueryResult, ResultContract};
use extprog_core::{BridgeConfig, Error, Result};
use extprog_exec::CommandExecutor;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identity reported by every data source read.
pub const DATA_SOURCE_ID: &str = "-";

/// Runs one query: encode, execute with the query on stdin, parse stdout.
#[derive(Clone, Debug, Default)]
pub struct QueryRunner {
    timeout: Option<Duration>,
}

impl QueryRunner {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }

    pub async fn run(
        &self,
        label: &str,
        config: &QueryConfig,
        contract: ResultContract,
        cancel: &CancellationToken,
    ) -> Result<QueryResult> {
        let spec = config.command()?;
        let input = config.encode()?;
        debug!("{}: running {} with {} query key(s)", label, spec.program(), config.filtered_query().len());

        let output = CommandExecutor::new(label, &spec)
            .working_dir(config.working_dir.as_deref())
            .timeout(self.timeout)
            .run_piped(input, cancel)
            .await?;

        contract.parse(&spec.display(), &output.stdout)
    }
}

/// State of the `external` data source after a read.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct DataSourceState {
    pub id: String,
    pub result: DynamicValue,
}

/// The `external` data source: any JSON value as the result.
#[derive(Clone, Debug, Default)]
pub struct ExternalDataSource {
    runner: QueryRunner,
}

impl ExternalDataSource {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            runner: QueryRunner::new(config),
        }
    }

    pub async fn read(&self, config: &QueryConfig, cancel: &CancellationToken) -> Result<DataSourceState> {
        match self
            .runner
            .run("external data source", config, ResultContract::Dynamic, cancel)
            .await?
        {
            QueryResult::Dynamic(result) => Ok(DataSourceState {
                id: DATA_SOURCE_ID.to_string(),
                result,
            }),
            QueryResult::StringMap(_) => Err(unexpected_shape(config)),
        }
    }
}

/// The `external` ephemeral resource: a flat string map as the result.
#[derive(Clone, Debug, Default)]
pub struct ExternalEphemeral {
    runner: QueryRunner,
}

impl ExternalEphemeral {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            runner: QueryRunner::new(config),
        }
    }

    pub async fn open(
        &self,
        config: &QueryConfig,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>> {
        match self
            .runner
            .run("external ephemeral resource", config, ResultContract::StringMap, cancel)
            .await?
        {
            QueryResult::StringMap(map) => Ok(map),
            QueryResult::Dynamic(_) => Err(unexpected_shape(config)),
        }
    }
}

// Unreachable unless `ResultContract::parse` stops honouring its contract.
fn unexpected_shape(config: &QueryConfig) -> Error {
    let program = config.command().map(|s| s.display()).unwrap_or_default();
    Error::malformed_output(program, "a result matching the requested contract", "contract mismatch")
}
