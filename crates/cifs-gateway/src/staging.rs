//! Local staging of remote files.
//!
//! Files are staged under `<staging_root>/<scope-id>/<remote-relative-path>`.
//! The scope id is unique per request, so two requests for the same remote
//! path never touch the same local file. Both [`StagingScope`] and
//! [`StagedFile`] delete what they own when dropped.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{GatewayError, Result};
use crate::session::ConnectedShare;
use crate::smb::OpenFlags;

/// What happens to the remote file once it is staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePolicy {
    Keep,
    /// Remove the remote copy after a fully successful stage
    DeleteRemote,
}

impl RemotePolicy {
    pub fn delete_if(flag: bool) -> Self {
        if flag {
            RemotePolicy::DeleteRemote
        } else {
            RemotePolicy::Keep
        }
    }
}

/// Splits a share-relative path into the components mirrored locally.
///
/// Rejects empty paths and anything that could land outside the scope.
pub fn remote_path_components(remote_path: &str) -> Result<Vec<&str>> {
    if remote_path.is_empty() {
        return Err(GatewayError::invalid_argument("path can't be empty"));
    }
    if remote_path.contains('\0') {
        return Err(GatewayError::invalid_argument("path contains null byte"));
    }
    let mut parts = Vec::new();
    for part in remote_path.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(GatewayError::invalid_argument(format!(
                    "path {} contains parent directory (..)",
                    remote_path
                )))
            }
            // drive prefixes such as "C:"
            p if p.contains(':') => {
                return Err(GatewayError::invalid_argument(format!(
                    "path {} contains invalid component",
                    remote_path
                )))
            }
            p => parts.push(p),
        }
    }
    if parts.is_empty() {
        return Err(GatewayError::invalid_argument(format!(
            "path {} names no file",
            remote_path
        )));
    }
    Ok(parts)
}

/// Process-wide staging root; hands out per-request scopes.
#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a scope under a fresh random id.
    pub fn scope(&self) -> Result<StagingScope> {
        self.scope_with_id(&Uuid::new_v4().to_string())
    }

    /// Creates a scope under a caller-supplied request id.
    pub fn scope_with_id(&self, id: &str) -> Result<StagingScope> {
        let valid = !id.is_empty()
            && id != "."
            && id != ".."
            && !id.contains(['/', '\\', ':', '\0']);
        if !valid {
            return Err(GatewayError::invalid_argument(format!(
                "invalid staging id {:?}",
                id
            )));
        }
        let dir = self.root.join(id);
        fs::create_dir_all(&dir)?;
        Ok(StagingScope {
            dir,
            id: id.to_string(),
            removed: false,
        })
    }
}

/// Request-unique staging directory, removed with its content on drop.
#[derive(Debug)]
pub struct StagingScope {
    dir: PathBuf,
    id: String,
    removed: bool,
}

impl StagingScope {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Local path mirroring `remote_path` inside this scope.
    pub fn local_path(&self, remote_path: &str) -> Result<PathBuf> {
        let mut local = self.dir.clone();
        for part in remote_path_components(remote_path)? {
            local.push(part);
        }
        Ok(local)
    }

    /// Regular files still present anywhere below the scope directory.
    pub fn leftover_files(&self) -> Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        let mut pending = vec![self.dir.clone()];
        while let Some(dir) = pending.pop() {
            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    pending.push(entry.path());
                } else {
                    found.push(entry.path());
                }
            }
        }
        found.sort();
        Ok(found)
    }

    /// Fails with `CleanupInvariant` if any staged file survived cleanup.
    pub fn ensure_empty(&self) -> Result<()> {
        let leftovers = self.leftover_files()?;
        if leftovers.is_empty() {
            return Ok(());
        }
        warn!(
            dir = %self.dir.display(),
            count = leftovers.len(),
            "staging directory not empty after cleanup"
        );
        Err(GatewayError::CleanupInvariant {
            path: self.dir.display().to_string(),
        })
    }

    /// Removes the scope directory and everything below it.
    pub fn remove(mut self) -> Result<()> {
        self.removed = true;
        remove_dir_if_present(&self.dir)
    }
}

fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl Drop for StagingScope {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(e) = remove_dir_if_present(&self.dir) {
            warn!(dir = %self.dir.display(), error = %e, "failed to remove staging scope");
        }
    }
}

/// A staged local copy of a remote file, deleted on drop unless kept.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    remote_path: String,
    disarmed: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    /// Base name of the staged file.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn size(&self) -> Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Reads the whole file as UTF-8 text.
    pub fn read_string(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path)?)
    }

    /// Deletes the local file now, reporting failure.
    pub fn remove(mut self) -> Result<()> {
        self.disarmed = true;
        debug!(path = %self.path.display(), "delete staged file");
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Hands the local file to the caller; it is no longer deleted on drop.
    pub fn keep(mut self) -> PathBuf {
        self.disarmed = true;
        self.path.clone()
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.disarmed {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to clean up staged file"
                );
            }
        }
    }
}

/// Copies `remote_path` from `share` into `scope`.
///
/// The remote file is probed first, so a missing file fails with
/// `FileNotFound` before anything is created locally. An existing local file
/// at the mirrored path is overwritten. If the copy fails midway the error is
/// returned and the partial local file stays until the scope is removed.
/// With [`RemotePolicy::DeleteRemote`] the remote file is removed only after
/// the copy completed.
pub fn stage(
    share: &ConnectedShare,
    scope: &StagingScope,
    remote_path: &str,
    policy: RemotePolicy,
) -> Result<StagedFile> {
    let local = scope.local_path(remote_path)?;

    if !share.file_exists(remote_path)? {
        return Err(GatewayError::FileNotFound {
            path: remote_path.to_string(),
        });
    }

    let mut remote = share.open(remote_path, OpenFlags::read_existing())?;
    if let Some(parent) = local.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(File::create(&local)?);
    let copied = io::copy(&mut remote, &mut out).map_err(GatewayError::from_io)?;
    out.flush()?;
    remote.close()?;
    debug!(
        share = share.name(),
        remote_path,
        local = %local.display(),
        bytes = copied,
        "staged"
    );

    if policy == RemotePolicy::DeleteRemote {
        share.rm(remote_path)?;
        debug!(share = share.name(), remote_path, "removed remote copy after staging");
    }

    Ok(StagedFile {
        path: local,
        remote_path: remote_path.to_string(),
        disarmed: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_path_components() {
        assert_eq!(remote_path_components("docs/a.xml").unwrap(), vec!["docs", "a.xml"]);
        assert_eq!(
            remote_path_components("/docs//./a.xml").unwrap(),
            vec!["docs", "a.xml"]
        );
        assert_eq!(
            remote_path_components("docs\\sub\\a.xml").unwrap(),
            vec!["docs", "sub", "a.xml"]
        );
    }

    #[test]
    fn test_remote_path_rejects_unsafe() {
        for bad in ["", "/", "../a.xml", "docs/../../a.xml", "C:/a.xml", "a\0b"] {
            let err = remote_path_components(bad).unwrap_err();
            assert!(
                matches!(err, GatewayError::InvalidArgument { .. }),
                "{:?} accepted",
                bad
            );
        }
    }

    #[test]
    fn test_scopes_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let a = area.scope().unwrap();
        let b = area.scope().unwrap();
        assert_ne!(a.dir(), b.dir());
        assert_ne!(
            a.local_path("docs/a.xml").unwrap(),
            b.local_path("docs/a.xml").unwrap()
        );
    }

    #[test]
    fn test_scope_with_bad_id() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        assert!(area.scope_with_id("../x").is_err());
        assert!(area.scope_with_id("").is_err());
    }

    #[test]
    fn test_local_path_mirrors_remote() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let scope = area.scope_with_id("req-1").unwrap();
        assert_eq!(
            scope.local_path("/docs/a.xml").unwrap(),
            dir.path().join("req-1").join("docs").join("a.xml")
        );
    }

    #[test]
    fn test_ensure_empty_detects_leftover() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let scope = area.scope().unwrap();
        fs::create_dir_all(scope.dir().join("docs")).unwrap();
        assert!(scope.ensure_empty().is_ok());

        fs::write(scope.dir().join("docs/stale.xml"), b"x").unwrap();
        let err = scope.ensure_empty().unwrap_err();
        assert!(matches!(err, GatewayError::CleanupInvariant { .. }));
        assert_eq!(scope.leftover_files().unwrap().len(), 1);
    }

    #[test]
    fn test_scope_drop_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let area = StagingArea::new(dir.path());
        let scope_dir = {
            let scope = area.scope().unwrap();
            fs::write(scope.dir().join("x"), b"x").unwrap();
            scope.dir().to_path_buf()
        };
        assert!(!scope_dir.exists());
    }

    #[test]
    fn test_staged_file_drop_and_keep() {
        let dir = tempfile::tempdir().unwrap();
        let dropped = dir.path().join("dropped");
        fs::write(&dropped, b"x").unwrap();
        drop(StagedFile {
            path: dropped.clone(),
            remote_path: "dropped".to_string(),
            disarmed: false,
        });
        assert!(!dropped.exists());

        let kept = dir.path().join("kept");
        fs::write(&kept, b"x").unwrap();
        let staged = StagedFile {
            path: kept.clone(),
            remote_path: "kept".to_string(),
            disarmed: false,
        };
        assert_eq!(staged.file_name(), "kept");
        assert_eq!(staged.keep(), kept);
        assert!(kept.exists());
    }

    #[test]
    fn test_remote_policy_delete_if() {
        assert_eq!(RemotePolicy::delete_if(true), RemotePolicy::DeleteRemote);
        assert_eq!(RemotePolicy::delete_if(false), RemotePolicy::Keep);
    }
}
