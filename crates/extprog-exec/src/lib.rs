//! extprog exec - everything that touches the filesystem or spawns processes
//!
//! The interchange directory is the only channel between the bridge and a
//! lifecycle program. The executor runs one command against it (or against
//! stdin/stdout for the stateless protocol).

pub mod env;
pub mod executor;
pub mod interchange;
pub mod lookup;
mod perms;

pub use env::{ProgramEnv, ENV_DIR, ENV_DIR_ABS, ENV_MANAGED_FILES};
pub use executor::{CapturedOutput, CommandExecutor, Execution, PipedOutput};
pub use interchange::{Field, FieldSet, InterchangeDir};
pub use lookup::resolve_program;
