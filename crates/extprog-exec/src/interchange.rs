//! Interchange directory - the private, per-step directory shared with a program.
//!
//! One directory per lifecycle step. Every managed file is written before the
//! program starts, with a mode that encodes who may read or write it. The
//! directory is removed on `close` unless the retention policy keeps it, and a
//! handle dropped without `close` still cleans up after itself.

use crate::perms;
use extprog_core::{BridgeConfig, Error, FileMode, ManagedFile, Result, Retention};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Mode used for fields that do not specify one.
pub const DEFAULT_FIELD_MODE: FileMode = 0o400;

const DIR_MODE: u32 = 0o700;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub content: String,
    pub mode: FileMode,
}

/// Files to seed an interchange directory with, keyed by file name.
#[derive(Clone, Debug, Default)]
pub struct FieldSet {
    fields: BTreeMap<String, Field>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field. `None` mode means read-only for the program.
    pub fn insert(&mut self, name: impl Into<String>, content: impl Into<String>, mode: Option<FileMode>) {
        self.fields.insert(
            name.into(),
            Field {
                content: content.into(),
                mode: mode.unwrap_or(DEFAULT_FIELD_MODE),
            },
        );
    }

    /// Add a managed file with its contract mode.
    pub fn insert_file(&mut self, file: ManagedFile, content: impl Into<String>) {
        self.insert(file.name(), content, Some(file.default_mode()));
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Handle to an open interchange directory.
#[derive(Debug)]
pub struct InterchangeDir {
    path: PathBuf,
    files: Vec<String>,
    retention: Retention,
    closed: bool,
}

impl InterchangeDir {
    /// Create the directory and write every field into it.
    ///
    /// A pinned path is resolved against the current directory, then created
    /// (with parents) if missing.
    /// Otherwise a uniquely named subdirectory of `config.tmpdir_base` is made.
    /// The first filesystem failure aborts the open.
    pub async fn open(
        config: &BridgeConfig,
        fields: &FieldSet,
        pinned: Option<&Path>,
        retention: Retention,
    ) -> Result<Self> {
        let path = match pinned {
            Some(dir) => {
                // The program may run elsewhere; hand it a path valid from anywhere.
                let dir = std::path::absolute(dir).map_err(|source| Error::PathResolution {
                    path: dir.to_path_buf(),
                    source,
                })?;
                create_dir_all(&dir).await?;
                dir
            }
            None => {
                create_dir_all(&config.tmpdir_base).await?;
                unique_subdir(&config.tmpdir_base)?
            }
        };
        debug!("opened interchange directory {}", path.display());

        // From here on the handle owns the directory; an early return drops it
        // and the drop guard removes what was created.
        let dir = Self {
            path,
            files: fields.names().map(String::from).collect(),
            retention,
            closed: false,
        };

        for (name, field) in fields.iter() {
            dir.create_file(name, &field.content, field.mode).await?;
        }
        Ok(dir)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }

    /// Names of every file seeded at open, sorted.
    pub fn managed_files(&self) -> &[String] {
        &self.files
    }

    pub fn retention(&self) -> Retention {
        self.retention
    }

    /// Read a file the program may have written.
    ///
    /// Files the owner cannot read (mode 0200) are made readable for the
    /// duration of the read, then put back to their original mode whether or
    /// not the read succeeded. A missing file is a `MissingFile` warning;
    /// content that is not UTF-8 is an error rather than being rewritten.
    pub async fn read_file(&self, name: &str) -> Result<String> {
        let path = self.file_path(name);
        let meta = fs::metadata(&path)
            .await
            .map_err(|source| Error::MissingFile { path: path.clone(), source })?;

        let original = perms::mode_of(&meta);
        let unreadable = original & 0o400 == 0;
        if unreadable {
            perms::set_mode(&path, 0o400).await.map_err(|e| {
                Error::file_access(format!("make readable ({:#o} -> {:#o})", original, 0o400), &path, e)
            })?;
        }

        let content = fs::read(&path).await;

        let restored = if unreadable {
            perms::set_mode(&path, original).await
        } else {
            Ok(())
        };

        let content = content.map_err(|e| Error::file_access("read", &path, e))?;
        restored.map_err(|e| {
            Error::file_access(format!("revert file mode ({:#o} -> {:#o})", 0o400, original), &path, e)
        })?;
        String::from_utf8(content).map_err(|e| {
            Error::file_access("decode", &path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }

    /// Remove the directory unless the retention policy keeps it.
    pub async fn close(mut self, had_error: bool) -> Result<()> {
        self.closed = true;
        if self.retention.keeps(had_error) {
            debug!("keeping interchange directory {}", self.path.display());
            return Ok(());
        }
        fs::remove_dir_all(&self.path)
            .await
            .map_err(|source| Error::Cleanup { path: self.path.clone(), source })?;
        debug!("removed interchange directory {}", self.path.display());
        Ok(())
    }

    async fn create_file(&self, name: &str, content: &str, mode: FileMode) -> Result<()> {
        let path = self.file_path(name);
        let fail = |action: &'static str| {
            let path = path.clone();
            move |source: std::io::Error| Error::DirectoryCreation { action, path, source }
        };

        // A pinned directory may still hold last step's files, some read-only.
        match fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(fail("replace file")(e)),
        }

        let mut opts = fs::OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        opts.mode(mode);
        let mut file = opts.open(&path).await.map_err(fail("create file"))?;
        file.write_all(content.as_bytes()).await.map_err(fail("write to file"))?;
        file.flush().await.map_err(fail("write to file"))?;
        drop(file);

        // The process umask may have stripped bits from the requested mode.
        perms::set_mode(&path, mode).await.map_err(fail("set mode of file"))
    }
}

impl Drop for InterchangeDir {
    fn drop(&mut self) {
        if self.closed || self.retention.keeps(true) {
            return;
        }
        warn!(
            "interchange directory {} was not closed; removing it",
            self.path.display()
        );
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove {}: {}", self.path.display(), e);
            }
        }
    }
}

async fn create_dir_all(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder
        .create(dir)
        .await
        .map_err(|source| Error::DirectoryCreation {
            action: "create directory",
            path: dir.to_path_buf(),
            source,
        })
}

fn unique_subdir(base: &Path) -> Result<PathBuf> {
    let dir = tempfile::Builder::new()
        .prefix("")
        .rand_bytes(10)
        .tempdir_in(base)
        .map_err(|source| Error::DirectoryCreation {
            action: "create temporary directory in",
            path: base.to_path_buf(),
            source,
        })?;
    Ok(dir.keep())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> FieldSet {
        let mut f = FieldSet::new();
        f.insert_file(ManagedFile::Input, "hello");
        f.insert_file(ManagedFile::Output, "");
        f.insert("custom", "c", None);
        f
    }

    #[test]
    fn unspecified_mode_is_read_only() {
        let f = fields();
        assert_eq!(f.get("custom").unwrap().mode, 0o400);
        assert_eq!(f.get("output").unwrap().mode, 0o200);
        assert_eq!(f.names().collect::<Vec<_>>(), vec!["custom", "input", "output"]);
    }

    #[tokio::test]
    async fn open_writes_every_field_with_mode() {
        let base = tempfile::tempdir().unwrap();
        let config = BridgeConfig::with_tmpdir_base(base.path().join("nested/base"));
        let dir = InterchangeDir::open(&config, &fields(), None, Retention::default())
            .await
            .unwrap();

        assert!(dir.path().starts_with(base.path().join("nested/base")));
        for name in ["input", "output", "custom"] {
            assert!(dir.file_path(name).exists(), "{} missing", name);
        }
        let meta = std::fs::metadata(dir.file_path("output")).unwrap();
        assert_eq!(perms::mode_of(&meta), 0o200);
        let meta = std::fs::metadata(dir.file_path("input")).unwrap();
        assert_eq!(perms::mode_of(&meta), 0o400);

        let path = dir.path().to_path_buf();
        dir.close(false).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn two_opens_get_distinct_directories() {
        let base = tempfile::tempdir().unwrap();
        let config = BridgeConfig::with_tmpdir_base(base.path());
        let a = InterchangeDir::open(&config, &fields(), None, Retention::default()).await.unwrap();
        let b = InterchangeDir::open(&config, &fields(), None, Retention::default()).await.unwrap();
        assert_ne!(a.path(), b.path());
        a.close(false).await.unwrap();
        b.close(false).await.unwrap();
    }

    #[tokio::test]
    async fn read_restores_write_only_mode() {
        let base = tempfile::tempdir().unwrap();
        let config = BridgeConfig::with_tmpdir_base(base.path());
        let dir = InterchangeDir::open(&config, &fields(), None, Retention::default()).await.unwrap();

        std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(dir.file_path("output"))
            .and_then(|mut f| std::io::Write::write_all(&mut f, b"computed"))
            .unwrap();

        assert_eq!(dir.read_file("output").await.unwrap(), "computed");
        let meta = std::fs::metadata(dir.file_path("output")).unwrap();
        assert_eq!(perms::mode_of(&meta), 0o200);
        dir.close(false).await.unwrap();
    }

    #[tokio::test]
    async fn non_utf8_content_is_an_error() {
        let base = tempfile::tempdir().unwrap();
        let config = BridgeConfig::with_tmpdir_base(base.path());
        let mut f = FieldSet::new();
        f.insert_file(ManagedFile::State, "");
        let dir = InterchangeDir::open(&config, &f, None, Retention::default()).await.unwrap();
        std::fs::write(dir.file_path("state"), b"\xff\xfeab").unwrap();

        let err = dir.read_file("state").await.unwrap_err();
        assert!(matches!(err, Error::FileAccess { .. }));
        assert_eq!(err.severity(), extprog_core::Severity::Error);
        assert!(err.summary().contains("decode"));
        dir.close(false).await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_a_warning() {
        let base = tempfile::tempdir().unwrap();
        let config = BridgeConfig::with_tmpdir_base(base.path());
        let dir = InterchangeDir::open(&config, &fields(), None, Retention::default()).await.unwrap();
        std::fs::remove_file(dir.file_path("input")).unwrap();

        let err = dir.read_file("input").await.unwrap_err();
        assert!(matches!(err, Error::MissingFile { .. }));
        assert_eq!(err.severity(), extprog_core::Severity::Warning);
        dir.close(false).await.unwrap();
    }

    #[tokio::test]
    async fn retention_keeps_directory() {
        let base = tempfile::tempdir().unwrap();
        let config = BridgeConfig::with_tmpdir_base(base.path());

        let keep_on_error = Retention { keep_always: false, keep_on_error: true };
        let dir = InterchangeDir::open(&config, &fields(), None, keep_on_error).await.unwrap();
        let path = dir.path().to_path_buf();
        dir.close(true).await.unwrap();
        assert!(path.exists());

        let dir = InterchangeDir::open(&config, &fields(), None, keep_on_error).await.unwrap();
        let path = dir.path().to_path_buf();
        dir.close(false).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn pinned_directory_is_reused_and_overwritten() {
        let base = tempfile::tempdir().unwrap();
        let pinned = base.path().join("pinned/dir");
        let config = BridgeConfig::with_tmpdir_base(base.path().join("unused"));
        let keep = Retention { keep_always: true, keep_on_error: false };

        let dir = InterchangeDir::open(&config, &fields(), Some(&pinned), keep).await.unwrap();
        assert_eq!(dir.path(), pinned.as_path());
        assert!(dir.path().is_absolute());
        dir.close(false).await.unwrap();

        let mut second = FieldSet::new();
        second.insert_file(ManagedFile::Input, "hi");
        let dir = InterchangeDir::open(&config, &second, Some(&pinned), keep).await.unwrap();
        assert_eq!(std::fs::read_to_string(dir.file_path("input")).unwrap(), "hi");
        dir.close(false).await.unwrap();
        assert!(!base.path().join("unused").exists());
    }

    #[tokio::test]
    async fn dropped_handle_removes_directory() {
        let base = tempfile::tempdir().unwrap();
        let config = BridgeConfig::with_tmpdir_base(base.path());
        let dir = InterchangeDir::open(&config, &fields(), None, Retention::default()).await.unwrap();
        let path = dir.path().to_path_buf();
        drop(dir);
        assert!(!path.exists());
    }
}
