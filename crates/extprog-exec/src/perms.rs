//! Permission bits, with a best-effort fallback off Unix.

use extprog_core::FileMode;
use std::path::Path;

#[cfg(unix)]
pub(crate) fn mode_of(meta: &std::fs::Metadata) -> FileMode {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
pub(crate) fn mode_of(meta: &std::fs::Metadata) -> FileMode {
    if meta.permissions().readonly() {
        0o400
    } else {
        0o600
    }
}

#[cfg(unix)]
pub(crate) async fn set_mode(path: &Path, mode: FileMode) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
pub(crate) async fn set_mode(path: &Path, mode: FileMode) -> std::io::Result<()> {
    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_readonly(mode & 0o200 == 0);
    tokio::fs::set_permissions(path, perms).await
}

#[cfg(unix)]
pub(crate) fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub(crate) fn is_executable(path: &Path) -> bool {
    path.is_file()
}
