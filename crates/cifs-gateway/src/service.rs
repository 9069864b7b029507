//! Request-level operations on configured shares.
//!
//! Each call owns its session: listing, fetch and delete open a share for
//! the single operation; transform and move hold one session across all the
//! protocol calls they make. Sessions are closed on every exit path.

use std::io::Write;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::CifsConfig;
use crate::error::{GatewayError, Result};
use crate::listing::{self, DirectoryEntry, SortKey};
use crate::mutate;
use crate::session::SessionManager;
use crate::smb::SmbClient;
use crate::staging::{stage, RemotePolicy, StagingArea, StagingScope};
use crate::transform::{self, TransformItem};

/// Content type for downloaded files.
pub const FETCH_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes of a downloaded file and the name to offer it under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

impl FetchedFile {
    /// Value for a `Content-Disposition` header.
    pub fn content_disposition(&self) -> String {
        format!("attachment;filename={}", self.file_name)
    }
}

/// Removes `scope`, keeping the first error.
fn finish_scope<T>(scope: StagingScope, result: Result<T>) -> Result<T> {
    let removed = scope.remove();
    match result {
        Ok(value) => removed.map(|_| value),
        Err(e) => {
            if let Err(remove_err) = removed {
                warn!(error = %remove_err, "staging scope removal after failure");
            }
            Err(e)
        }
    }
}

pub struct ShareService {
    config: Arc<CifsConfig>,
    sessions: SessionManager,
    staging: StagingArea,
}

impl ShareService {
    pub fn new(config: Arc<CifsConfig>, client: Arc<dyn SmbClient>) -> Self {
        let sessions = SessionManager::from_config(client, &config);
        let staging = StagingArea::new(config.staging_dir.clone());
        Self {
            config,
            sessions,
            staging,
        }
    }

    pub fn config(&self) -> &CifsConfig {
        &self.config
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Lists `path` on `share`; `sort_key == Some("changetime")` orders by
    /// ascending change time.
    pub fn list_entries(
        &self,
        share: &str,
        path: &str,
        sort_key: Option<&str>,
    ) -> Result<Vec<DirectoryEntry>> {
        let key = SortKey::parse(sort_key);
        debug!(share, path, ?key, "list entries");
        self.sessions
            .with_share(share, |connected| listing::list(connected, path, key))
    }

    /// Downloads one file through a fresh staging scope.
    ///
    /// The staged copy is deleted once its bytes are read, and the scope must
    /// then be empty; anything left over fails with `CleanupInvariant`.
    pub fn fetch_file(&self, share: &str, path: &str) -> Result<FetchedFile> {
        if path.is_empty() {
            return Err(GatewayError::invalid_argument("path can't be empty"));
        }
        debug!(share, path, "serving request");

        let scope = self.staging.scope()?;
        let policy = RemotePolicy::delete_if(self.config.delete_file_after_download);
        let fetched = self.sessions.with_share(share, |connected| {
            let staged = stage(connected, &scope, path, policy)?;
            let bytes = staged.read_bytes()?;
            let file_name = staged.file_name();
            debug!(file = %file_name, size = bytes.len(), "downloaded file");
            staged.remove()?;
            Ok(FetchedFile { bytes, file_name })
        });

        let checked = fetched.and_then(|f| scope.ensure_empty().map(|_| f));
        finish_scope(scope, checked)
    }

    /// Streams the converted `items` to `out` as one JSON array.
    ///
    /// One session serves every item and is closed afterwards, also when an
    /// item fails. On failure `out` holds an unterminated array.
    pub fn transform_batch<W: Write>(
        &self,
        share: &str,
        items: &[TransformItem],
        out: &mut W,
    ) -> Result<usize> {
        debug!(share, items = items.len(), "transform batch");
        let scope = self.staging.scope()?;
        let mut emitted = 0;
        let result = self.sessions.with_share(share, |connected| {
            emitted = transform::transform(connected, &scope, items, out)?;
            Ok(())
        });
        let checked = result.and_then(|_| scope.ensure_empty());
        finish_scope(scope, checked).map(|_| emitted)
    }

    /// Removes one remote file; absent files are ignored.
    pub fn delete_file(&self, share: &str, path: &str) -> Result<()> {
        if path.is_empty() {
            return Err(GatewayError::invalid_argument("path can't be empty"));
        }
        self.sessions
            .with_share(share, |connected| mutate::remove(connected, path))
    }

    /// Moves a file within one share (copy, then delete).
    pub fn move_file(&self, share: &str, from: &str, to: &str) -> Result<()> {
        if from.is_empty() || to.is_empty() {
            return Err(GatewayError::invalid_argument("path can't be empty"));
        }
        self.sessions
            .with_share(share, |connected| mutate::move_file(connected, from, to))
    }
}
