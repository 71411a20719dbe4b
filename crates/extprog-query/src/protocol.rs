//! Wire format of the stateless protocol.

use extprog_core::{CommandSpec, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration of one query, as the host hands it over.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryConfig {
    /// Raw command elements; nulls and empty strings are dropped before running.
    pub program: Vec<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub query: BTreeMap<String, Option<String>>,
}

impl QueryConfig {
    pub fn command(&self) -> Result<CommandSpec> {
        CommandSpec::from_parts(self.program.iter().cloned())
    }

    /// Query with null values removed. Empty strings are kept.
    pub fn filtered_query(&self) -> BTreeMap<&str, &str> {
        self.query
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k.as_str(), v)))
            .collect()
    }

    /// The bytes written to the program's stdin.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&self.filtered_query())?)
    }
}

/// How stdout is interpreted. Chosen by the component, never guessed from
/// the output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultContract {
    /// A JSON object with string values only (ephemeral resource).
    StringMap,
    /// Any JSON value (data source).
    Dynamic,
}

impl ResultContract {
    pub fn expected(&self) -> &'static str {
        match self {
            Self::StringMap => "a JSON object whose values are all strings",
            Self::Dynamic => "valid JSON",
        }
    }

    /// Parse program output. `program` only names the program in errors.
    pub fn parse(&self, program: &str, stdout: &[u8]) -> Result<QueryResult> {
        let malformed = |e: serde_json::Error| Error::malformed_output(program, self.expected(), e.to_string());
        match self {
            // `null` decodes to an empty map rather than an error.
            Self::StringMap => serde_json::from_slice::<Option<BTreeMap<String, String>>>(stdout)
                .map(|map| QueryResult::StringMap(map.unwrap_or_default()))
                .map_err(malformed),
            Self::Dynamic => serde_json::from_slice::<serde_json::Value>(stdout)
                .map(|value| QueryResult::Dynamic(value.into()))
                .map_err(malformed),
        }
    }
}

/// Result of a query, shaped by its contract.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum QueryResult {
    StringMap(BTreeMap<String, String>),
    Dynamic(DynamicValue),
}

/// Dynamically typed value built from arbitrary JSON. Arrays become tuples
/// since their elements need not share a type.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum DynamicValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    Tuple(Vec<DynamicValue>),
    Object(BTreeMap<String, DynamicValue>),
}

impl DynamicValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Tuple(_) => "tuple",
            Self::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn get(&self, key: &str) -> Option<&DynamicValue> {
        match self {
            Self::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for DynamicValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Tuple(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}
