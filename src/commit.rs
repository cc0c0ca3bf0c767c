//! Change detection and conditional writes.
//!
//! A render produces the full destination content every time. Most of the
//! time nothing upstream changed, and rewriting the file would needlessly
//! trigger reload hooks. [`commit`] therefore compares fingerprints and only
//! writes when the content differs:
//!
//! 1. Destination missing: write it, report `true`.
//! 2. Destination present: fingerprint both contents. Different → overwrite,
//!    report `true`. Identical → leave the file alone, report `false`.
//! 3. Any stat/read/write failure other than "not found" aborts with
//!    [`CommitError::Io`] before anything is written.
//!
//! ## Fingerprints
//!
//! SHA-256 over the raw bytes. Collisions are not a concern for change
//! detection and the digest keeps the comparison constant-size.
//!
//! ## Writes
//!
//! New content goes to a temporary file next to the destination, which is
//! then renamed over it. A crash or full disk mid-write leaves the old file
//! intact. New files are created `0644`; existing files keep their mode and,
//! where the process is allowed to, their owner and group.
//!
//! A symlinked destination is resolved first: the link stays in place and
//! its target receives the new content. A dangling symlink is replaced by a
//! regular file. The directory holding the (resolved) destination must be
//! writable, since that is where the temporary file lives.
//!
//! One writer per destination is assumed. Concurrent commits to the same path
//! need external locking.

use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Mode for newly created destination files.
pub const NEW_FILE_MODE: u32 = 0o644;

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("failed to {op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_error(op: &'static str, path: &Path) -> impl FnOnce(io::Error) -> CommitError {
    let path = path.to_path_buf();
    move |source| CommitError::Io { op, path, source }
}

/// SHA-256 digest of some content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(content: &[u8]) -> Self {
        Self(Sha256::digest(content).into())
    }

}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Outcome of comparing new content against the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub dest: PathBuf,
    /// Fingerprint of the current destination content, `None` if it does not exist.
    pub previous: Option<Fingerprint>,
    pub current: Fingerprint,
}

impl CommitRecord {
    pub fn changed(&self) -> bool {
        self.previous != Some(self.current)
    }
}

/// Compare `content` against `dest` without writing anything.
pub fn plan(dest: &Path, content: &[u8]) -> Result<CommitRecord, CommitError> {
    let previous = match fs::metadata(dest) {
        Ok(_) => {
            let existing = fs::read(dest).map_err(io_error("read", dest))?;
            Some(Fingerprint::of(&existing))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(io_error("stat", dest)(err)),
    };
    Ok(CommitRecord {
        dest: dest.to_path_buf(),
        previous,
        current: Fingerprint::of(content),
    })
}

/// Write `content` to `dest` if it differs from what is there.
///
/// Returns whether the destination changed.
pub fn commit(dest: &Path, content: &[u8]) -> Result<bool, CommitError> {
    let record = plan(dest, content)?;
    if !record.changed() {
        debug!(dest = %dest.display(), fingerprint = %record.current, "unchanged");
        return Ok(false);
    }
    write_atomic(dest, content)?;
    info!(
        dest = %dest.display(),
        previous = %record.previous.map(|fp| fp.to_string()).unwrap_or_else(|| "none".into()),
        current = %record.current,
        "written"
    );
    Ok(true)
}

fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), CommitError> {
    let target = resolve_target(dest)?;
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_error("create temporary file in", dir))?;
    tmp.write_all(content).map_err(io_error("write", tmp.path()))?;
    tmp.as_file().sync_all().map_err(io_error("sync", tmp.path()))?;

    let permissions = match fs::metadata(&target) {
        Ok(meta) => {
            preserve_owner(tmp.as_file(), &meta, &target);
            Some(meta.permissions())
        }
        Err(_) => new_file_permissions(),
    };
    if let Some(permissions) = permissions {
        tmp.as_file()
            .set_permissions(permissions)
            .map_err(io_error("set permissions on", tmp.path()))?;
    }

    tmp.persist(&target)
        .map_err(|err| io_error("replace", &target)(err.error))?;
    Ok(())
}

/// The path the write lands on. Symlinks are followed so the link survives.
fn resolve_target(dest: &Path) -> Result<PathBuf, CommitError> {
    match fs::canonicalize(dest) {
        Ok(path) => Ok(path),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(dest.to_path_buf()),
        Err(err) => Err(io_error("resolve", dest)(err)),
    }
}

/// Hand the replacement file to the destination's owner and group.
#[cfg(unix)]
fn preserve_owner(file: &fs::File, original: &fs::Metadata, target: &Path) {
    use std::os::unix::fs::{MetadataExt, fchown};
    let same = file
        .metadata()
        .map(|meta| meta.uid() == original.uid() && meta.gid() == original.gid())
        .unwrap_or(false);
    if same {
        return;
    }
    if let Err(err) = fchown(file, Some(original.uid()), Some(original.gid())) {
        warn!(dest = %target.display(), error = %err, "could not keep owner and group");
    }
}

#[cfg(not(unix))]
fn preserve_owner(_file: &fs::File, _original: &fs::Metadata, _target: &Path) {}

#[cfg(unix)]
fn new_file_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(NEW_FILE_MODE))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<fs::Permissions> {
    None
}
