//! Share client backed by locally mounted shares.
//!
//! `<mount_root>/<share>/...` is served as share `<share>`. Listings carry
//! the same `.`/`..` pseudo-entries, attribute bits and FILETIME stamps a
//! real server returns, and the connect → authenticate → tree-connect chain
//! is enforced through id tables.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::smb::{
    datetime_to_filetime, CreateDisposition, OpenFlags, SmbClient, SmbConnectionId,
    SmbCredentials, SmbDirEntry, SmbFileId, SmbSessionId, SmbTreeId, FILE_ATTRIBUTE_ARCHIVE,
    FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_READONLY,
};

const ALLOCATION_UNIT: u64 = 4096;

struct OpenFile {
    file: File,
    path: PathBuf,
}

/// [`SmbClient`] serving shares from a local mount root.
pub struct MountedShareClient {
    mount_root: PathBuf,
    accounts: HashMap<String, String>,
    connections: RwLock<HashSet<SmbConnectionId>>,
    sessions: RwLock<HashMap<SmbSessionId, SmbConnectionId>>,
    trees: RwLock<HashMap<SmbTreeId, PathBuf>>,
    files: Mutex<HashMap<SmbFileId, OpenFile>>,
    next_id: AtomicU64,
}

impl MountedShareClient {
    /// Creates a client that accepts any credentials.
    pub fn new(mount_root: impl Into<PathBuf>) -> Self {
        Self {
            mount_root: mount_root.into(),
            accounts: HashMap::new(),
            connections: RwLock::new(HashSet::new()),
            sessions: RwLock::new(HashMap::new()),
            trees: RwLock::new(HashMap::new()),
            files: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Restricts authentication to the registered accounts.
    pub fn with_account(mut self, username: &str, password: &str) -> Self {
        self.accounts
            .insert(username.to_string(), password.to_string());
        self
    }

    pub fn mount_root(&self) -> &Path {
        &self.mount_root
    }

    /// Number of ids of every kind still held open.
    pub fn open_handle_count(&self) -> usize {
        let conns = self.connections.read().map(|c| c.len()).unwrap_or(0);
        let sessions = self.sessions.read().map(|s| s.len()).unwrap_or(0);
        let trees = self.trees.read().map(|t| t.len()).unwrap_or(0);
        let files = self.files.lock().map(|f| f.len()).unwrap_or(0);
        conns + sessions + trees + files
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn next_tree(&self) -> Result<SmbTreeId> {
        let raw = self.next();
        u32::try_from(raw)
            .map(SmbTreeId)
            .map_err(|_| GatewayError::InvalidHandle {
                reason: format!("tree id space exhausted at {}", raw),
            })
    }

    fn tree_root(&self, tree: SmbTreeId) -> Result<PathBuf> {
        self.trees
            .read()
            .ok()
            .and_then(|t| t.get(&tree).cloned())
            .ok_or_else(|| GatewayError::InvalidHandle {
                reason: format!("unknown tree id {}", tree.0),
            })
    }

    fn resolve(&self, tree: SmbTreeId, path: &str) -> Result<PathBuf> {
        let mut resolved = self.tree_root(tree)?;
        for part in share_path_components(path)? {
            resolved.push(part);
        }
        Ok(resolved)
    }
}

/// Splits a share-relative path on either separator, refusing to climb out
/// of the share.
fn share_path_components(path: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    for part in path.split(['/', '\\']) {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(GatewayError::invalid_argument(format!(
                    "path {} leaves the share",
                    path
                )))
            }
            _ => {
                if Path::new(part)
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
                {
                    return Err(GatewayError::invalid_argument(format!(
                        "invalid path component in {}",
                        path
                    )));
                }
                parts.push(part);
            }
        }
    }
    Ok(parts)
}

fn poisoned(table: &str) -> GatewayError {
    GatewayError::InvalidHandle {
        reason: format!("{} table poisoned", table),
    }
}

fn dir_entry(name: &str, meta: &fs::Metadata) -> SmbDirEntry {
    let mut attributes = if meta.is_dir() {
        FILE_ATTRIBUTE_DIRECTORY
    } else {
        FILE_ATTRIBUTE_ARCHIVE
    };
    if meta.permissions().readonly() {
        attributes |= FILE_ATTRIBUTE_READONLY;
    }
    let end_of_file = if meta.is_dir() { 0 } else { meta.len() };
    let change_time = meta
        .modified()
        .map(|t| datetime_to_filetime(DateTime::<Utc>::from(t)))
        .unwrap_or(0);
    SmbDirEntry {
        file_name: name.to_string(),
        file_attributes: attributes,
        end_of_file,
        allocation_size: end_of_file.div_ceil(ALLOCATION_UNIT) * ALLOCATION_UNIT,
        change_time,
    }
}

impl SmbClient for MountedShareClient {
    fn connect(&self, host: &str, port: u16) -> Result<SmbConnectionId> {
        if host.is_empty() {
            return Err(GatewayError::Connection {
                reason: "no host given".to_string(),
            });
        }
        if port == 0 {
            return Err(GatewayError::Connection {
                reason: format!("{}:{} is closed", host, port),
            });
        }
        if !self.mount_root.is_dir() {
            return Err(GatewayError::Connection {
                reason: format!(
                    "{}:{} unreachable, mount root {} missing",
                    host,
                    port,
                    self.mount_root.display()
                ),
            });
        }
        let id = SmbConnectionId(self.next());
        self.connections
            .write()
            .map_err(|_| poisoned("connection"))?
            .insert(id);
        debug!(host, port, conn = id.0, "connected");
        Ok(id)
    }

    fn authenticate(
        &self,
        conn: SmbConnectionId,
        credentials: &SmbCredentials,
    ) -> Result<SmbSessionId> {
        let known = self
            .connections
            .read()
            .map(|c| c.contains(&conn))
            .unwrap_or(false);
        if !known {
            return Err(GatewayError::InvalidHandle {
                reason: format!("unknown connection id {}", conn.0),
            });
        }
        if !self.accounts.is_empty()
            && self.accounts.get(&credentials.username) != Some(&credentials.password)
        {
            return Err(GatewayError::Connection {
                reason: format!(
                    "authentication rejected for {}\\{}",
                    credentials.domain, credentials.username
                ),
            });
        }
        let id = SmbSessionId(self.next());
        self.sessions
            .write()
            .map_err(|_| poisoned("session"))?
            .insert(id, conn);
        Ok(id)
    }

    fn tree_connect(&self, session: SmbSessionId, share: &str) -> Result<SmbTreeId> {
        let known = self
            .sessions
            .read()
            .map(|s| s.contains_key(&session))
            .unwrap_or(false);
        if !known {
            return Err(GatewayError::InvalidHandle {
                reason: format!("unknown session id {}", session.0),
            });
        }
        let valid_name = !share.is_empty()
            && share != "."
            && share != ".."
            && !share.contains(['/', '\\', '\0']);
        let root = self.mount_root.join(share);
        if !valid_name || !root.is_dir() {
            return Err(GatewayError::ShareNotFound {
                share: share.to_string(),
            });
        }
        let id = self.next_tree()?;
        self.trees
            .write()
            .map_err(|_| poisoned("tree"))?
            .insert(id, root);
        Ok(id)
    }

    fn tree_disconnect(&self, tree: SmbTreeId) -> Result<()> {
        let removed = self
            .trees
            .write()
            .map(|mut t| t.remove(&tree).is_some())
            .unwrap_or(false);
        if removed {
            Ok(())
        } else {
            Err(GatewayError::InvalidHandle {
                reason: format!("unknown tree id {}", tree.0),
            })
        }
    }

    fn logoff(&self, session: SmbSessionId) -> Result<()> {
        let removed = self
            .sessions
            .write()
            .map(|mut s| s.remove(&session).is_some())
            .unwrap_or(false);
        if removed {
            Ok(())
        } else {
            Err(GatewayError::InvalidHandle {
                reason: format!("unknown session id {}", session.0),
            })
        }
    }

    fn disconnect(&self, conn: SmbConnectionId) -> Result<()> {
        let removed = self
            .connections
            .write()
            .map(|mut c| c.remove(&conn))
            .unwrap_or(false);
        if removed {
            Ok(())
        } else {
            Err(GatewayError::InvalidHandle {
                reason: format!("unknown connection id {}", conn.0),
            })
        }
    }

    fn smb_readdir(&self, tree: SmbTreeId, path: &str) -> Result<Vec<SmbDirEntry>> {
        let dir = self.resolve(tree, path)?;
        if !dir.is_dir() {
            return Err(GatewayError::PathNotFound {
                path: path.to_string(),
            });
        }
        let root = self.tree_root(tree)?;
        let parent = if dir == root {
            dir.clone()
        } else {
            dir.parent().map(Path::to_path_buf).unwrap_or_else(|| dir.clone())
        };

        let mut entries = vec![
            dir_entry(".", &fs::metadata(&dir)?),
            dir_entry("..", &fs::metadata(&parent)?),
        ];
        let mut children = Vec::new();
        for child in fs::read_dir(&dir)? {
            let child = child?;
            let name = child.file_name().to_string_lossy().into_owned();
            children.push(dir_entry(&name, &child.metadata()?));
        }
        children.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        entries.extend(children);
        Ok(entries)
    }

    fn smb_file_exists(&self, tree: SmbTreeId, path: &str) -> Result<bool> {
        Ok(self.resolve(tree, path)?.is_file())
    }

    fn smb_open(&self, tree: SmbTreeId, path: &str, flags: OpenFlags) -> Result<SmbFileId> {
        let local = self.resolve(tree, path)?;
        let file = match flags.disposition {
            CreateDisposition::Open => OpenOptions::new()
                .read(flags.read)
                .write(flags.write)
                .open(&local),
            CreateDisposition::OverwriteIf => OpenOptions::new()
                .read(flags.read)
                .write(true)
                .create(true)
                .truncate(true)
                .open(&local),
        };
        let file = file.map_err(|e| match e.kind() {
            ErrorKind::NotFound => GatewayError::FileNotFound {
                path: path.to_string(),
            },
            _ => GatewayError::Io(e),
        })?;
        let id = SmbFileId(self.next());
        self.files
            .lock()
            .map_err(|_| poisoned("file"))?
            .insert(id, OpenFile { file, path: local });
        Ok(id)
    }

    fn smb_read(&self, file_id: SmbFileId, offset: u64, len: u32) -> Result<Vec<u8>> {
        let mut files = self.files.lock().map_err(|_| poisoned("file"))?;
        let open = files
            .get_mut(&file_id)
            .ok_or_else(|| GatewayError::InvalidHandle {
                reason: format!("unknown file id {}", file_id.0),
            })?;
        open.file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(len as usize);
        (&mut open.file).take(u64::from(len)).read_to_end(&mut buf)?;
        Ok(buf)
    }

    fn smb_write(&self, file_id: SmbFileId, offset: u64, data: &[u8]) -> Result<u32> {
        let mut files = self.files.lock().map_err(|_| poisoned("file"))?;
        let open = files
            .get_mut(&file_id)
            .ok_or_else(|| GatewayError::InvalidHandle {
                reason: format!("unknown file id {}", file_id.0),
            })?;
        open.file.seek(SeekFrom::Start(offset))?;
        open.file.write_all(data)?;
        Ok(data.len() as u32)
    }

    fn smb_close(&self, file_id: SmbFileId) -> Result<()> {
        let removed = self
            .files
            .lock()
            .ok()
            .and_then(|mut f| f.remove(&file_id));
        match removed {
            Some(mut open) => {
                open.file.flush()?;
                debug!(path = %open.path.display(), "closed remote file");
                Ok(())
            }
            None => Err(GatewayError::InvalidHandle {
                reason: format!("unknown file id {}", file_id.0),
            }),
        }
    }

    fn smb_unlink(&self, tree: SmbTreeId, path: &str) -> Result<()> {
        let local = self.resolve(tree, path)?;
        fs::remove_file(&local).map_err(|e| match e.kind() {
            ErrorKind::NotFound => GatewayError::FileNotFound {
                path: path.to_string(),
            },
            _ => GatewayError::Io(e),
        })
    }
}
