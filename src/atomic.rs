//! Publish-or-nothing writes and exclusive claims over a plain filesystem.
//!
//! Every cross-process interaction in the queue is built from the three
//! functions here. None of them return errors: a coordination primitive that
//! could not do its job reports `false`/`None`, and the caller decides whether
//! to retry at the orchestration layer.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use tempfile::NamedTempFile;

use crate::{elog_debug, elog_trace, elog_warn};

/// Default time to wait for a contended lock file.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between non-blocking lock attempts.
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of full lock-and-write attempts before giving up.
const MAX_LOCKED_WRITE_ATTEMPTS: u32 = 3;

/// Pause between failed lock-and-write attempts.
const LOCKED_WRITE_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Write `content` to `path` so that readers see either the old file or the
/// complete new one.
///
/// The data goes to a temp file in the same directory (rename is only atomic
/// within one filesystem) which is then renamed over `path`. Returns `false`
/// if the parent directory is missing or any step fails; the temp file is
/// removed and `path` is left untouched in that case.
pub fn atomic_write(path: &Path, content: &str) -> bool {
    let Some(dir) = existing_parent(path) else {
        elog_debug!("atomic_write: parent of {} does not exist", path.display());
        return false;
    };

    match write_via_rename(&dir, path, content) {
        Ok(()) => {
            elog_trace!("atomic_write: published {}", path.display());
            true
        }
        Err(e) => {
            elog_warn!("atomic_write: failed for {}: {}", path.display(), e);
            false
        }
    }
}

/// Result of [`atomic_create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The file did not exist and now holds the new content.
    Created,
    /// Another writer got there first; its file is untouched.
    Exists,
    /// The parent directory is missing or an I/O step failed.
    Failed,
}

/// Publish `content` at `path` only if nothing is there yet.
///
/// Same temp-file-and-rename scheme as [`atomic_write`], but the final step
/// refuses to replace an existing file, so of several racing creators
/// exactly one sees [`CreateOutcome::Created`].
pub fn atomic_create(path: &Path, content: &str) -> CreateOutcome {
    let Some(dir) = existing_parent(path) else {
        elog_debug!("atomic_create: parent of {} does not exist", path.display());
        return CreateOutcome::Failed;
    };

    let created = NamedTempFile::new_in(&dir).and_then(|mut tmp| {
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(path).map_err(|e| e.error)?;
        Ok(())
    });
    match created {
        Ok(()) => {
            elog_trace!("atomic_create: published {}", path.display());
            CreateOutcome::Created
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            elog_debug!("atomic_create: {} already exists", path.display());
            CreateOutcome::Exists
        }
        Err(e) => {
            elog_warn!("atomic_create: failed for {}: {}", path.display(), e);
            CreateOutcome::Failed
        }
    }
}

/// Like [`atomic_write`], but serialized against other writers of the same
/// path through an exclusive advisory lock on `<path>.lock`.
///
/// The lock is polled without blocking until `timeout` elapses. The whole
/// lock-and-write sequence is attempted up to three times. The lock is
/// released and the lock file removed on every exit path.
pub fn atomic_write_with_lock(path: &Path, content: &str, timeout: Duration) -> bool {
    let Some(dir) = existing_parent(path) else {
        elog_debug!(
            "atomic_write_with_lock: parent of {} does not exist",
            path.display()
        );
        return false;
    };
    let lock_path = lock_path_for(path);
    let published = write_with_retries(&dir, path, &lock_path, content, timeout);
    // Removed once on the way out, so retries keep contending on the same inode.
    let _ = fs::remove_file(&lock_path);
    published
}

fn write_with_retries(
    dir: &Path,
    path: &Path,
    lock_path: &Path,
    content: &str,
    timeout: Duration,
) -> bool {
    for attempt in 1..=MAX_LOCKED_WRITE_ATTEMPTS {
        match locked_write(dir, path, lock_path, content, timeout) {
            Ok(()) => return true,
            Err(e) => {
                elog_warn!(
                    "atomic_write_with_lock: attempt {}/{} for {} failed: {}",
                    attempt,
                    MAX_LOCKED_WRITE_ATTEMPTS,
                    path.display(),
                    e
                );
                if attempt < MAX_LOCKED_WRITE_ATTEMPTS {
                    thread::sleep(LOCKED_WRITE_RETRY_DELAY);
                }
            }
        }
    }

    false
}

/// Move `path` into `dest_dir`, keeping its file name.
///
/// Rename is the exclusivity primitive: when several processes race for the
/// same file exactly one rename succeeds. Losers (and any other failure)
/// get `None`.
pub fn atomic_claim(path: &Path, dest_dir: &Path) -> Option<PathBuf> {
    let file_name = path.file_name()?;
    let dest = dest_dir.join(file_name);

    match fs::rename(path, &dest) {
        Ok(()) => {
            elog_trace!("atomic_claim: {} -> {}", path.display(), dest.display());
            Some(dest)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            elog_trace!("atomic_claim: lost race for {}", path.display());
            None
        }
        Err(e) => {
            elog_warn!("atomic_claim: failed to move {}: {}", path.display(), e);
            None
        }
    }
}

/// Sibling lock file used by [`atomic_write_with_lock`].
pub fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn existing_parent(path: &Path) -> Option<PathBuf> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    dir.is_dir().then_some(dir)
}

fn write_via_rename(dir: &Path, path: &Path, content: &str) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    // On failure the PersistError still owns the temp file and deletes it on drop.
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn locked_write(
    dir: &Path,
    path: &Path,
    lock_path: &Path,
    content: &str,
    timeout: Duration,
) -> io::Result<()> {
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)?;

    acquire_exclusive(&lock_file, timeout)?;
    let result = write_via_rename(dir, path, content);
    let _ = FileExt::unlock(&lock_file);
    result
}

fn acquire_exclusive(file: &File, timeout: Duration) -> io::Result<()> {
    let start = Instant::now();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                if start.elapsed() >= timeout {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("failed to acquire lock within {:?}", timeout),
                    ));
                }
                thread::sleep(LOCK_POLL_INTERVAL);
            }
            Err(e) => return Err(e),
        }
    }
}
