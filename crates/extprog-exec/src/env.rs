//! Program environment - the inherited environment plus the interchange variables.

use crate::interchange::InterchangeDir;
use extprog_core::{Error, Result};
use std::ffi::{OsStr, OsString};
use std::path::Path;

/// Directory path as given to the program.
pub const ENV_DIR: &str = "TF_EXTERNAL_DIR";
/// Absolute form of `TF_EXTERNAL_DIR`.
pub const ENV_DIR_ABS: &str = "TF_EXTERNAL_DIR_ABS";
/// Colon-joined names of every managed file.
pub const ENV_MANAGED_FILES: &str = "TF_EXTERNAL_MANAGED_FILES";

/// Variables added on top of the inherited environment. Building one never
/// touches the real process environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgramEnv {
    vars: Vec<(String, OsString)>,
}

impl ProgramEnv {
    pub fn for_dir(dir: &InterchangeDir) -> Result<Self> {
        Self::build(dir.path(), dir.managed_files().iter().map(String::as_str))
    }

    pub fn build<'a>(dir: &Path, files: impl IntoIterator<Item = &'a str>) -> Result<Self> {
        let abs = std::path::absolute(dir).map_err(|source| Error::PathResolution {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut names: Vec<&str> = files.into_iter().collect();
        names.sort_unstable();
        names.dedup();

        Ok(Self {
            vars: vec![
                (ENV_DIR.into(), dir.as_os_str().to_owned()),
                (ENV_DIR_ABS.into(), abs.into_os_string()),
                (ENV_MANAGED_FILES.into(), names.join(":").into()),
            ],
        })
    }

    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_os_str())
    }

    /// Only the added variables.
    pub fn vars(&self) -> &[(String, OsString)] {
        &self.vars
    }

    pub fn apply(&self, cmd: &mut tokio::process::Command) {
        cmd.envs(self.vars.iter().map(|(k, v)| (k.as_str(), v.as_os_str())));
    }
}
