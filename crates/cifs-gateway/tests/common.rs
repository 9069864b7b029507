//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cifs_gateway::smb::{
    OpenFlags, SmbConnectionId, SmbDirEntry, SmbFileId, SmbSessionId, SmbTreeId,
};
use cifs_gateway::{
    CifsConfig, GatewayError, MountedShareClient, Result, ShareService, SmbClient, SmbCredentials,
};
use tempfile::TempDir;

/// A mount root holding shares plus a separate staging root.
pub struct TestShares {
    mount: TempDir,
    staging: TempDir,
}

impl TestShares {
    pub fn new(shares: &[&str]) -> Self {
        let mount = tempfile::tempdir().expect("mount tempdir");
        for share in shares {
            fs::create_dir_all(mount.path().join(share)).expect("share dir");
        }
        Self {
            mount,
            staging: tempfile::tempdir().expect("staging tempdir"),
        }
    }

    pub fn mount_root(&self) -> &Path {
        self.mount.path()
    }

    pub fn staging_root(&self) -> &Path {
        self.staging.path()
    }

    pub fn remote(&self, share: &str, path: &str) -> PathBuf {
        self.mount.path().join(share).join(path)
    }

    /// Creates `share/path` with `contents`, including parent directories.
    pub fn put(&self, share: &str, path: &str, contents: impl AsRef<[u8]>) {
        let target = self.remote(share, path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).expect("parent dir");
        }
        fs::write(target, contents).expect("write remote file");
    }

    pub fn exists(&self, share: &str, path: &str) -> bool {
        self.remote(share, path).exists()
    }

    /// Regular files anywhere below the staging root.
    pub fn staged_files(&self) -> Vec<PathBuf> {
        fn walk(dir: &Path, found: &mut Vec<PathBuf>) {
            let Ok(entries) = fs::read_dir(dir) else {
                return;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    walk(&path, found);
                } else {
                    found.push(path);
                }
            }
        }
        let mut found = Vec::new();
        walk(self.staging.path(), &mut found);
        found
    }

    pub fn config(&self, delete_after_download: bool) -> CifsConfig {
        CifsConfig {
            hostname: "fileserver".to_string(),
            username: "svc".to_string(),
            password: "secret".to_string(),
            delete_file_after_download: delete_after_download,
            staging_dir: self.staging.path().to_path_buf(),
            mount_root: self.mount.path().to_path_buf(),
            ..CifsConfig::default()
        }
    }

    pub fn client(&self) -> Arc<MountedShareClient> {
        Arc::new(MountedShareClient::new(self.mount.path()))
    }

    pub fn service(&self, delete_after_download: bool) -> ShareService {
        ShareService::new(Arc::new(self.config(delete_after_download)), self.client())
    }

    pub fn service_with(&self, client: Arc<dyn SmbClient>) -> ShareService {
        ShareService::new(Arc::new(self.config(false)), client)
    }
}

/// Forwards to a [`MountedShareClient`] and counts every protocol call.
pub struct CountingClient {
    inner: MountedShareClient,
    calls: AtomicUsize,
}

impl CountingClient {
    pub fn new(mount_root: &Path) -> Self {
        Self {
            inner: MountedShareClient::new(mount_root),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn open_handles(&self) -> usize {
        self.inner.open_handle_count()
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

impl SmbClient for CountingClient {
    fn connect(&self, host: &str, port: u16) -> Result<SmbConnectionId> {
        self.tick();
        self.inner.connect(host, port)
    }

    fn authenticate(
        &self,
        conn: SmbConnectionId,
        credentials: &SmbCredentials,
    ) -> Result<SmbSessionId> {
        self.tick();
        self.inner.authenticate(conn, credentials)
    }

    fn tree_connect(&self, session: SmbSessionId, share: &str) -> Result<SmbTreeId> {
        self.tick();
        self.inner.tree_connect(session, share)
    }

    fn tree_disconnect(&self, tree: SmbTreeId) -> Result<()> {
        self.tick();
        self.inner.tree_disconnect(tree)
    }

    fn logoff(&self, session: SmbSessionId) -> Result<()> {
        self.tick();
        self.inner.logoff(session)
    }

    fn disconnect(&self, conn: SmbConnectionId) -> Result<()> {
        self.tick();
        self.inner.disconnect(conn)
    }

    fn smb_readdir(&self, tree: SmbTreeId, path: &str) -> Result<Vec<SmbDirEntry>> {
        self.tick();
        self.inner.smb_readdir(tree, path)
    }

    fn smb_file_exists(&self, tree: SmbTreeId, path: &str) -> Result<bool> {
        self.tick();
        self.inner.smb_file_exists(tree, path)
    }

    fn smb_open(&self, tree: SmbTreeId, path: &str, flags: OpenFlags) -> Result<SmbFileId> {
        self.tick();
        self.inner.smb_open(tree, path, flags)
    }

    fn smb_read(&self, file_id: SmbFileId, offset: u64, len: u32) -> Result<Vec<u8>> {
        self.tick();
        self.inner.smb_read(file_id, offset, len)
    }

    fn smb_write(&self, file_id: SmbFileId, offset: u64, data: &[u8]) -> Result<u32> {
        self.tick();
        self.inner.smb_write(file_id, offset, data)
    }

    fn smb_close(&self, file_id: SmbFileId) -> Result<()> {
        self.tick();
        self.inner.smb_close(file_id)
    }

    fn smb_unlink(&self, tree: SmbTreeId, path: &str) -> Result<()> {
        self.tick();
        self.inner.smb_unlink(tree, path)
    }
}

/// Forwards to a [`MountedShareClient`] but fails data transfer past a byte
/// limit, and unlink on request.
pub struct FaultyClient {
    inner: MountedShareClient,
    read_limit: Option<u64>,
    write_limit: Option<u64>,
    fail_unlink: bool,
}

impl FaultyClient {
    pub fn new(mount_root: &Path) -> Self {
        Self {
            inner: MountedShareClient::new(mount_root),
            read_limit: None,
            write_limit: None,
            fail_unlink: false,
        }
    }

    /// Reads starting at or after `limit` bytes fail.
    pub fn fail_reads_after(mut self, limit: u64) -> Self {
        self.read_limit = Some(limit);
        self
    }

    /// Writes that would extend past `limit` bytes fail without writing.
    pub fn fail_writes_after(mut self, limit: u64) -> Self {
        self.write_limit = Some(limit);
        self
    }

    pub fn fail_unlink(mut self) -> Self {
        self.fail_unlink = true;
        self
    }

    pub fn open_handles(&self) -> usize {
        self.inner.open_handle_count()
    }

    fn io_failure(what: &str) -> GatewayError {
        GatewayError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            format!("{} interrupted", what),
        ))
    }
}

impl SmbClient for FaultyClient {
    fn connect(&self, host: &str, port: u16) -> Result<SmbConnectionId> {
        self.inner.connect(host, port)
    }

    fn authenticate(
        &self,
        conn: SmbConnectionId,
        credentials: &SmbCredentials,
    ) -> Result<SmbSessionId> {
        self.inner.authenticate(conn, credentials)
    }

    fn tree_connect(&self, session: SmbSessionId, share: &str) -> Result<SmbTreeId> {
        self.inner.tree_connect(session, share)
    }

    fn tree_disconnect(&self, tree: SmbTreeId) -> Result<()> {
        self.inner.tree_disconnect(tree)
    }

    fn logoff(&self, session: SmbSessionId) -> Result<()> {
        self.inner.logoff(session)
    }

    fn disconnect(&self, conn: SmbConnectionId) -> Result<()> {
        self.inner.disconnect(conn)
    }

    fn smb_readdir(&self, tree: SmbTreeId, path: &str) -> Result<Vec<SmbDirEntry>> {
        self.inner.smb_readdir(tree, path)
    }

    fn smb_file_exists(&self, tree: SmbTreeId, path: &str) -> Result<bool> {
        self.inner.smb_file_exists(tree, path)
    }

    fn smb_open(&self, tree: SmbTreeId, path: &str, flags: OpenFlags) -> Result<SmbFileId> {
        self.inner.smb_open(tree, path, flags)
    }

    fn smb_read(&self, file_id: SmbFileId, offset: u64, len: u32) -> Result<Vec<u8>> {
        if self.read_limit.is_some_and(|limit| offset >= limit) {
            return Err(Self::io_failure("read"));
        }
        self.inner.smb_read(file_id, offset, len)
    }

    fn smb_write(&self, file_id: SmbFileId, offset: u64, data: &[u8]) -> Result<u32> {
        if self
            .write_limit
            .is_some_and(|limit| offset + data.len() as u64 > limit)
        {
            return Err(Self::io_failure("write"));
        }
        self.inner.smb_write(file_id, offset, data)
    }

    fn smb_close(&self, file_id: SmbFileId) -> Result<()> {
        self.inner.smb_close(file_id)
    }

    fn smb_unlink(&self, tree: SmbTreeId, path: &str) -> Result<()> {
        if self.fail_unlink {
            return Err(Self::io_failure("unlink"));
        }
        self.inner.smb_unlink(tree, path)
    }
}
