//! Attribute marshaling - resource attributes to seeded files and back.

use extprog_core::{Diagnostics, Error, ManagedFile, ResourceData, Result, Verb};
use extprog_exec::{FieldSet, InterchangeDir};
use tracing::trace;

/// Attributes the program computes, read back after every successful run
/// (after `id`).
pub const COMPUTED: [ManagedFile; 3] = [ManagedFile::State, ManagedFile::Output, ManagedFile::OutputSensitive];

/// Files to seed the directory with for `verb`.
///
/// `old_state` is the state before the change: empty on create, the prior
/// state on update, and the current state otherwise. Capture files are
/// seeded empty so they are listed in the managed file set.
pub fn fields_for(data: &ResourceData, verb: Verb) -> FieldSet {
    let (id, old_state) = match verb {
        Verb::Create => ("", ""),
        Verb::Update => (data.id.as_str(), data.old_state()),
        Verb::Read | Verb::Delete => (data.id.as_str(), data.state.as_str()),
    };

    let mut fields = FieldSet::new();
    for file in ManagedFile::FIELDS {
        let content = match file {
            ManagedFile::Input => data.input.as_str(),
            ManagedFile::InputSensitive => data.input_sensitive.as_str(),
            ManagedFile::Id => id,
            ManagedFile::State => data.state.as_str(),
            ManagedFile::OldState => old_state,
            ManagedFile::Output => data.output.as_str(),
            ManagedFile::OutputSensitive => data.output_sensitive.as_str(),
            ManagedFile::Stdall | ManagedFile::Stdout | ManagedFile::Stderr => "",
        };
        fields.insert_file(file, content);
    }
    for file in data.options.capture_mode().files() {
        fields.insert_file(*file, "");
    }
    fields
}

/// Read `file` back into the matching attribute.
///
/// A file the program deleted is read as empty, with a warning. Anything
/// else that goes wrong is an error.
pub async fn read_back(
    dir: &InterchangeDir,
    data: &mut ResourceData,
    file: ManagedFile,
    diags: &mut Diagnostics,
) -> Result<()> {
    let content = match dir.read_file(file.name()).await {
        Ok(content) => content,
        Err(e @ Error::MissingFile { .. }) => {
            diags.push(e);
            String::new()
        }
        Err(e) => return Err(e),
    };
    if file.is_sensitive() {
        trace!("read back {} ({} bytes, sensitive)", file.name(), content.len());
    } else {
        trace!("read back {}: {:?}", file.name(), content);
    }
    data.set_attribute(file.name(), content)
}
