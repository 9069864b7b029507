//! Share session management
//!
//! A [`ShareSession`] owns a connection and the authenticated session on it;
//! a [`ConnectedShare`] additionally owns an opened share. Each guard
//! releases what it holds exactly once, in reverse acquisition order, either
//! through an explicit `close` (which reports the first teardown error) or on
//! drop (which logs it). Teardown errors after the first are only logged.

use std::io::{self, Read, Write};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::CifsConfig;
use crate::error::{GatewayError, Result};
use crate::smb::{
    OpenFlags, SmbClient, SmbConnectionId, SmbCredentials, SmbDirEntry, SmbFileId,
    SmbSessionId, SmbTreeId,
};

/// Largest single protocol read issued by [`RemoteFile`].
pub const MAX_READ_SIZE: u32 = 65_536;

fn keep_first(first: &mut Option<GatewayError>, step: &str, result: Result<()>) {
    if let Err(e) = result {
        if first.is_none() {
            *first = Some(e);
        } else {
            warn!(step, error = %e, "secondary teardown error");
        }
    }
}

/// Opens a connection and authenticates on it.
///
/// If authentication fails the connection is released before returning.
pub fn open_session(
    client: Arc<dyn SmbClient>,
    host: &str,
    port: u16,
    credentials: &SmbCredentials,
) -> Result<ShareSession> {
    let conn = client.connect(host, port)?;
    match client.authenticate(conn, credentials) {
        Ok(session) => {
            debug!(host, port, user = %credentials.username, "session established");
            Ok(ShareSession {
                client,
                conn,
                session,
                released: false,
            })
        }
        Err(e) => {
            if let Err(close_err) = client.disconnect(conn) {
                warn!(host, error = %close_err, "disconnect after failed authentication");
            }
            Err(e)
        }
    }
}

/// Authenticated connection to a remote host.
pub struct ShareSession {
    client: Arc<dyn SmbClient>,
    conn: SmbConnectionId,
    session: SmbSessionId,
    released: bool,
}

impl ShareSession {
    /// Opens `share` on this session. The session moves into the returned
    /// handle; on failure it is released here.
    pub fn connect_share(self, share: &str) -> Result<ConnectedShare> {
        let tree = self.client.tree_connect(self.session, share)?;
        debug!(share, tree = tree.0, "share connected");
        Ok(ConnectedShare {
            session: self,
            tree,
            name: share.to_string(),
            disconnected: false,
        })
    }

    /// Logs off and disconnects, returning the first teardown error.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        let mut first = None;
        keep_first(&mut first, "logoff", self.client.logoff(self.session));
        keep_first(&mut first, "disconnect", self.client.disconnect(self.conn));
        first.map_or(Ok(()), Err)
    }
}

impl Drop for ShareSession {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(error = %e, "session teardown failed");
        }
    }
}

/// A share opened on an authenticated session.
pub struct ConnectedShare {
    session: ShareSession,
    tree: SmbTreeId,
    name: String,
    disconnected: bool,
}

impl ConnectedShare {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &dyn SmbClient {
        self.session.client.as_ref()
    }

    /// Raw directory listing, pseudo-entries included.
    pub fn list(&self, path: &str) -> Result<Vec<SmbDirEntry>> {
        self.client().smb_readdir(self.tree, path)
    }

    pub fn file_exists(&self, path: &str) -> Result<bool> {
        self.client().smb_file_exists(self.tree, path)
    }

    pub fn open(&self, path: &str, flags: OpenFlags) -> Result<RemoteFile<'_>> {
        let id = self.client().smb_open(self.tree, path, flags)?;
        Ok(RemoteFile {
            share: self,
            id,
            offset: 0,
            path: path.to_string(),
            closed: false,
        })
    }

    pub fn rm(&self, path: &str) -> Result<()> {
        self.client().smb_unlink(self.tree, path)
    }

    /// Releases share, session and connection; first error wins.
    pub fn close(mut self) -> Result<()> {
        self.release()
    }

    fn release(&mut self) -> Result<()> {
        if self.disconnected {
            return Ok(());
        }
        self.disconnected = true;
        let mut first = None;
        keep_first(
            &mut first,
            "tree_disconnect",
            self.session.client.tree_disconnect(self.tree),
        );
        keep_first(&mut first, "session", self.session.release());
        debug!(share = %self.name, "share closed");
        first.map_or(Ok(()), Err)
    }
}

impl Drop for ConnectedShare {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(share = %self.name, error = %e, "share teardown failed");
        }
    }
}

/// Open remote file, closed on drop.
///
/// Reads and writes advance a running offset, so the handle plugs into
/// `std::io::copy` in either direction.
pub struct RemoteFile<'a> {
    share: &'a ConnectedShare,
    id: SmbFileId,
    offset: u64,
    path: String,
    closed: bool,
}

impl RemoteFile<'_> {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Closes the handle, reporting the protocol error if any.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.share.client().smb_close(self.id)
    }
}

impl Read for RemoteFile<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let want = buf.len().min(MAX_READ_SIZE as usize) as u32;
        if want == 0 {
            return Ok(0);
        }
        let data = self
            .share
            .client()
            .smb_read(self.id, self.offset, want)
            .map_err(GatewayError::into_io)?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        self.offset += n as u64;
        Ok(n)
    }
}

impl Write for RemoteFile<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self
            .share
            .client()
            .smb_write(self.id, self.offset, buf)
            .map_err(GatewayError::into_io)? as usize;
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for RemoteFile<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.share.client().smb_close(self.id) {
            warn!(path = %self.path, error = %e, "remote file close failed");
        }
    }
}

/// Opens share sessions against one configured host.
pub struct SessionManager {
    client: Arc<dyn SmbClient>,
    host: String,
    port: u16,
    credentials: SmbCredentials,
}

impl SessionManager {
    pub fn new(
        client: Arc<dyn SmbClient>,
        host: &str,
        port: u16,
        credentials: SmbCredentials,
    ) -> Self {
        Self {
            client,
            host: host.to_string(),
            port,
            credentials,
        }
    }

    pub fn from_config(client: Arc<dyn SmbClient>, config: &CifsConfig) -> Self {
        Self::new(client, &config.hostname, config.port, config.credentials())
    }

    pub fn open_session(&self) -> Result<ShareSession> {
        open_session(self.client.clone(), &self.host, self.port, &self.credentials)
    }

    /// Opens a session and connects `share` on it.
    pub fn connect(&self, share: &str) -> Result<ConnectedShare> {
        self.open_session()?.connect_share(share)
    }

    /// Runs `op` on a freshly connected share and closes it afterwards.
    ///
    /// An error from `op` is returned even if closing fails too; the close
    /// error is then only logged.
    pub fn with_share<T>(
        &self,
        share: &str,
        op: impl FnOnce(&ConnectedShare) -> Result<T>,
    ) -> Result<T> {
        let connected = self.connect(share)?;
        let result = op(&connected);
        let closed = connected.close();
        match result {
            Ok(value) => closed.map(|_| value),
            Err(e) => {
                if let Err(close_err) = closed {
                    warn!(share, error = %close_err, "close after failed operation");
                }
                Err(e)
            }
        }
    }
}
