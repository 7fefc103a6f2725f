//! Filesystem helpers used around a transfer.
//!
//! Cleanup helpers are best-effort: failures are logged and swallowed so they
//! never block a terminal transition.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::error::DownloadError;

/// Current size of `path`, or `None` if it does not exist or cannot be read.
pub(crate) async fn file_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path).await.ok().map(|meta| meta.len())
}

/// Deletes `path`, logging instead of failing.
pub(crate) async fn remove_best_effort(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}

/// Creates `dir` and its parents.
pub(crate) async fn ensure_dir(dir: &Path) -> Result<(), DownloadError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| DownloadError::io(dir, e))
}

/// Moves `from` to `to`, replacing any existing file at `to`.
///
/// Falls back to copy-and-delete when a rename cannot cross filesystems.
pub(crate) async fn move_replace(from: &Path, to: &Path) -> Result<(), DownloadError> {
    if from == to {
        return Ok(());
    }
    if let Some(parent) = to.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent).await?;
    }
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_error) => {
            debug!(
                from = %from.display(),
                to = %to.display(),
                error = %rename_error,
                "rename failed, copying instead"
            );
            tokio::fs::copy(from, to)
                .await
                .map_err(|e| DownloadError::io(to, e))?;
            remove_best_effort(from).await;
            Ok(())
        }
    }
}

/// Creates (or truncates) `path` as an empty file.
pub(crate) async fn create_empty(path: &Path) -> Result<(), DownloadError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir(parent).await?;
    }
    tokio::fs::File::create(path)
        .await
        .map(drop)
        .map_err(|e| DownloadError::io(path, e))
}

/// Returns true when another handle holds `path` exclusively.
///
/// A missing file is never locked. A file that cannot be opened for writing
/// is treated as locked.
pub(crate) async fn is_locked(path: &Path) -> bool {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || probe_exclusive(&path))
        .await
        .unwrap_or(true)
}

fn probe_exclusive(path: &Path) -> bool {
    let file = match std::fs::OpenOptions::new().read(true).write(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return false,
        Err(_) => return true,
    };
    match fs2::FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            let _ = fs2::FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}

/// Polls until `path` can be opened exclusively or `timeout` elapses.
///
/// Returns true if the file was released in time.
pub(crate) async fn wait_for_release(path: &Path, timeout: Duration, poll: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if !is_locked(path).await {
            return true;
        }
        if Instant::now() >= deadline {
            warn!(path = %path.display(), ?timeout, "file still held after wait");
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}

/// Sibling directory of `dir` used when a target name is held by another process.
pub(crate) fn sibling_temp_dir(dir: &Path, stamp: u128) -> PathBuf {
    dir.join(format!("transfer_{stamp}"))
}
