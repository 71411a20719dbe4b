//! Lifecycle orchestrator - CRUD on top of four stateless program runs
//!
//! Every verb follows the same shape: open a seeded interchange directory,
//! run the verb's program against it, read computed attributes back, close.
//! Close runs on every path once the directory is open, and its outcome is
//! appended to the same diagnostics as everything before it.

use crate::marshal::{self, COMPUTED};
use extprog_core::{BridgeConfig, Diagnostics, Error, ManagedFile, ResourceData, Result, Verb};
use extprog_exec::{CommandExecutor, InterchangeDir, ProgramEnv};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// The `external` managed resource.
#[derive(Clone, Debug, Default)]
pub struct ExternalResource {
    config: BridgeConfig,
}

impl ExternalResource {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Run `program_create` (or `program_update` when unset). The program must
    /// leave a non-empty `id`.
    pub async fn create(&self, data: &mut ResourceData, cancel: &CancellationToken) -> Diagnostics {
        self.drive(Verb::Create, data, cancel).await
    }

    /// Refresh. An empty `id` from the program means the resource is gone.
    pub async fn read(&self, data: &mut ResourceData, cancel: &CancellationToken) -> Diagnostics {
        self.drive(Verb::Read, data, cancel).await
    }

    pub async fn update(&self, data: &mut ResourceData, cancel: &CancellationToken) -> Diagnostics {
        self.drive(Verb::Update, data, cancel).await
    }

    /// Identity is cleared whether or not the program succeeds.
    pub async fn delete(&self, data: &mut ResourceData, cancel: &CancellationToken) -> Diagnostics {
        self.drive(Verb::Delete, data, cancel).await
    }

    /// Adopt an existing object by id: seed `id`, then read it. A read that
    /// clears the id means there was nothing to adopt.
    pub async fn import(&self, id: &str, data: &mut ResourceData, cancel: &CancellationToken) -> Diagnostics {
        data.id = id.to_string();
        data.prior_state = None;
        let mut diags = self.drive(Verb::Read, data, cancel).await;
        if !diags.has_error() && !data.exists() {
            diags.push(Error::ImportMissing { id: id.to_string() });
        }
        diags
    }

    pub async fn run(&self, verb: Verb, data: &mut ResourceData, cancel: &CancellationToken) -> Diagnostics {
        self.drive(verb, data, cancel).await
    }

    async fn drive(&self, verb: Verb, data: &mut ResourceData, cancel: &CancellationToken) -> Diagnostics {
        let mut diags = Diagnostics::new();
        info!("{} {}", verb, if data.exists() { data.id.as_str() } else { "(new)" });

        let (pinned, deprecation) = data.options.pinned_dir();
        if let Some(warning) = deprecation {
            diags.push(warning);
        }

        let fields = marshal::fields_for(data, verb);
        let opened =
            InterchangeDir::open(&self.config, &fields, pinned.as_deref(), data.options.retention()).await;
        let dir = match opened {
            Ok(dir) => dir,
            Err(e) => {
                diags.push(e);
                if verb == Verb::Delete {
                    data.id.clear();
                }
                return diags;
            }
        };

        let result = self.step(verb, &dir, data, &mut diags, cancel).await;
        diags.record(result);
        if verb == Verb::Delete {
            data.id.clear();
        }

        let had_error = diags.has_error();
        diags.record(dir.close(had_error).await);
        debug!("{} finished with {} diagnostic(s)", verb, diags.len());
        diags
    }

    async fn step(
        &self,
        verb: Verb,
        dir: &InterchangeDir,
        data: &mut ResourceData,
        diags: &mut Diagnostics,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let env = ProgramEnv::for_dir(dir)?;
        let (label, spec) = data.program_for(verb);
        CommandExecutor::new(&label, spec)
            .env(&env)
            .working_dir(data.options.working_dir.as_deref())
            .timeout(self.config.timeout_secs.map(Duration::from_secs))
            .run_captured(dir.path(), data.options.capture_mode(), cancel)
            .await?;

        match verb {
            Verb::Delete => return Ok(()),
            Verb::Create => {
                marshal::read_back(dir, data, ManagedFile::Id, diags).await?;
                if data.id.is_empty() {
                    return Err(Error::MissingIdentity { label });
                }
            }
            Verb::Read => {
                marshal::read_back(dir, data, ManagedFile::Id, diags).await?;
                if data.id.is_empty() {
                    debug!("read returned an empty id; resource no longer exists");
                    return Ok(());
                }
            }
            Verb::Update => {
                marshal::read_back(dir, data, ManagedFile::Id, diags).await?;
            }
        }

        for file in COMPUTED {
            marshal::read_back(dir, data, file, diags).await?;
        }
        Ok(())
    }
}
