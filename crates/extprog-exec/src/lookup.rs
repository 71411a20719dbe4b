//! Program lookup - PATH search for bare names, direct resolution for paths.

use crate::perms;
use extprog_core::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Resolve `program` to an absolute path.
///
/// Names containing a path separator are taken relative to `working_dir`
/// (or the current directory). Bare names are searched on `PATH`.
pub fn resolve_program(program: &str, working_dir: Option<&Path>) -> Result<PathBuf> {
    let cwd = std::env::current_dir().map_err(|e| Error::program_lookup(program, e.to_string()))?;

    if has_separator(program) {
        let base = match working_dir {
            Some(dir) => cwd.join(dir),
            None => cwd,
        };
        return which::which_in(program, None::<&str>, &base)
            .map_err(|e| Error::program_lookup(program, e.to_string()));
    }

    match which::which(program) {
        Ok(found) if found.is_absolute() => Ok(found),
        Ok(found) => Ok(accept_implicit_relative(program, cwd.join(found))),
        Err(err) => match search_relative_entries(program, &cwd) {
            Some(found) => Ok(accept_implicit_relative(program, found)),
            None => Err(Error::program_lookup(program, err.to_string())),
        },
    }
}

/// Compatibility only: a bare name found through a relative PATH entry (such
/// as `.`) has always been accepted, so it still is. Not a pattern to extend.
fn accept_implicit_relative(program: &str, found: PathBuf) -> PathBuf {
    debug!(
        "{} resolved through a relative PATH entry to {}; accepted for compatibility",
        program,
        found.display()
    );
    found
}

fn search_relative_entries(program: &str, cwd: &Path) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .filter(|entry| entry.is_relative())
        .map(|entry| cwd.join(entry).join(program))
        .find(|candidate| perms::is_executable(candidate))
}

fn has_separator(program: &str) -> bool {
    program.contains('/') || (cfg!(windows) && program.contains('\\'))
}
