//! Provider registry and component traits
//!
//! Every component the bridge offers implements one of two traits and is
//! registered under its host-facing type name. The host (or the CLI) looks a
//! component up by kind and name and drives it.

use extprog_core::{BridgeConfig, Diagnostics, Error, ResourceData, Result, Verb};
use extprog_lifecycle::ExternalResource;
use extprog_query::{ExternalDataSource, ExternalEphemeral, QueryConfig};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Type name every component is registered under.
pub const TYPE_NAME: &str = "external";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    DataSource,
    EphemeralResource,
    Resource,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DataSource => write!(f, "data source"),
            Self::EphemeralResource => write!(f, "ephemeral resource"),
            Self::Resource => write!(f, "resource"),
        }
    }
}

/// A stateless component: one query in, one result out.
#[async_trait::async_trait]
pub trait QuerySource: Send + Sync {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    /// `DataSource` or `EphemeralResource`.
    fn kind(&self) -> ComponentKind;

    /// Run the query and render the resulting attributes as JSON.
    async fn query(&self, config: &QueryConfig, cancel: &CancellationToken) -> Result<Value>;
}

/// A stateful component driven through the CRUD lifecycle.
#[async_trait::async_trait]
pub trait LifecycleResource: Send + Sync {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    async fn apply(&self, verb: Verb, data: &mut ResourceData, cancel: &CancellationToken) -> Diagnostics;

    /// Take over an object that already exists under `id`.
    async fn import(&self, id: &str, data: &mut ResourceData, cancel: &CancellationToken) -> Diagnostics;
}

/// Query results are already validated; a failure here is ours, not the program's.
fn render(kind: ComponentKind, state: &impl serde::Serialize) -> Result<Value> {
    serde_json::to_value(state).map_err(|source| Error::ResultRendering {
        component: kind.to_string(),
        source,
    })
}

#[async_trait::async_trait]
impl QuerySource for ExternalDataSource {
    fn kind(&self) -> ComponentKind {
        ComponentKind::DataSource
    }

    async fn query(&self, config: &QueryConfig, cancel: &CancellationToken) -> Result<Value> {
        let state = self.read(config, cancel).await?;
        render(self.kind(), &state)
    }
}

#[async_trait::async_trait]
impl QuerySource for ExternalEphemeral {
    fn kind(&self) -> ComponentKind {
        ComponentKind::EphemeralResource
    }

    async fn query(&self, config: &QueryConfig, cancel: &CancellationToken) -> Result<Value> {
        let result = self.open(config, cancel).await?;
        let result = render(self.kind(), &result)?;
        Ok(serde_json::json!({ "result": result }))
    }
}

#[async_trait::async_trait]
impl LifecycleResource for ExternalResource {
    async fn apply(&self, verb: Verb, data: &mut ResourceData, cancel: &CancellationToken) -> Diagnostics {
        self.run(verb, data, cancel).await
    }

    async fn import(&self, id: &str, data: &mut ResourceData, cancel: &CancellationToken) -> Diagnostics {
        ExternalResource::import(self, id, data, cancel).await
    }
}

pub struct ExternalProvider {
    sources: BTreeMap<(ComponentKind, String), Arc<dyn QuerySource>>,
    resources: BTreeMap<String, Arc<dyn LifecycleResource>>,
}

impl Default for ExternalProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalProvider {
    pub fn new() -> Self {
        Self {
            sources: BTreeMap::new(),
            resources: BTreeMap::new(),
        }
    }

    /// Register a stateless component. Replaces one of the same kind and name.
    pub fn register_source(&mut self, source: impl QuerySource + 'static) {
        let key = (source.kind(), source.type_name().to_string());
        self.sources.insert(key, Arc::new(source));
    }

    /// Register a managed resource. Replaces one of the same name.
    pub fn register_resource(&mut self, resource: impl LifecycleResource + 'static) {
        let name = resource.type_name().to_string();
        self.resources.insert(name, Arc::new(resource));
    }

    pub fn source(&self, kind: ComponentKind, name: &str) -> Option<Arc<dyn QuerySource>> {
        self.sources.get(&(kind, name.to_string())).cloned()
    }

    pub fn resource(&self, name: &str) -> Option<Arc<dyn LifecycleResource>> {
        self.resources.get(name).cloned()
    }

    /// Every registered component, sorted by kind then name.
    pub fn list(&self) -> Vec<(ComponentKind, &str)> {
        let mut all: Vec<(ComponentKind, &str)> = self
            .sources
            .keys()
            .map(|(kind, name)| (*kind, name.as_str()))
            .chain(
                self.resources
                    .keys()
                    .map(|name| (ComponentKind::Resource, name.as_str())),
            )
            .collect();
        all.sort();
        all
    }

    pub async fn query(
        &self,
        kind: ComponentKind,
        name: &str,
        config: &QueryConfig,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        match self.source(kind, name) {
            Some(source) => source.query(config, cancel).await,
            None => Err(Error::ConfigError(format!("no {} named {:?}", kind, name))),
        }
    }

    pub async fn apply(
        &self,
        name: &str,
        verb: Verb,
        data: &mut ResourceData,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        match self.resource(name) {
            Some(resource) => resource.apply(verb, data, cancel).await,
            None => Error::ConfigError(format!("no resource named {:?}", name)).into(),
        }
    }

    pub async fn import(
        &self,
        name: &str,
        id: &str,
        data: &mut ResourceData,
        cancel: &CancellationToken,
    ) -> Diagnostics {
        match self.resource(name) {
            Some(resource) => resource.import(id, data, cancel).await,
            None => Error::ConfigError(format!("no resource named {:?}", name)).into(),
        }
    }
}

/// The provider with all three `external` components.
pub fn create_default_provider(config: &BridgeConfig) -> ExternalProvider {
    let mut provider = ExternalProvider::new();
    provider.register_source(ExternalDataSource::new(config));
    provider.register_source(ExternalEphemeral::new(config));
    provider.register_resource(ExternalResource::new(config.clone()));
    provider
}
