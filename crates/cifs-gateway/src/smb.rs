//! Remote share client capability.
//!
//! The gateway never speaks SMB2 itself. Everything it needs from a share is
//! expressed by [`SmbClient`]: a connect → authenticate → tree-connect chain,
//! and file primitives addressed by the ids that chain hands out.

use chrono::{DateTime, Utc};

use crate::error::Result;

/// Default SMB port
pub const DEFAULT_SMB_PORT: u16 = 445;

/// FILE_ATTRIBUTE_READONLY
pub const FILE_ATTRIBUTE_READONLY: u32 = 0x0000_0001;
/// FILE_ATTRIBUTE_HIDDEN
pub const FILE_ATTRIBUTE_HIDDEN: u32 = 0x0000_0002;
/// FILE_ATTRIBUTE_DIRECTORY
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
/// FILE_ATTRIBUTE_ARCHIVE
pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x0000_0020;
/// FILE_ATTRIBUTE_NORMAL
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0000_0080;

/// 100ns ticks between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_EPOCH: u64 = 116_444_736_000_000_000;
const FILETIME_TICKS_PER_SEC: u64 = 10_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmbConnectionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmbSessionId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmbTreeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SmbFileId(pub u64);

/// Credentials presented at session setup.
#[derive(Clone)]
pub struct SmbCredentials {
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl SmbCredentials {
    pub fn new(username: &str, password: &str, domain: &str) -> Self {
        Self {
            username: username.to_string(),
            password: password.to_string(),
            domain: domain.to_string(),
        }
    }
}

impl std::fmt::Debug for SmbCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmbCredentials")
            .field("username", &self.username)
            .field("password", &"*".repeat(self.password.chars().count()))
            .field("domain", &self.domain)
            .finish()
    }
}

/// What to do when the target does or does not exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDisposition {
    /// FILE_OPEN: open existing, fail if absent
    Open,
    /// FILE_OVERWRITE_IF: truncate existing or create
    OverwriteIf,
}

#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub disposition: CreateDisposition,
}

impl OpenFlags {
    /// GENERIC_READ on an existing file.
    pub fn read_existing() -> Self {
        Self {
            read: true,
            write: false,
            disposition: CreateDisposition::Open,
        }
    }

    /// GENERIC_WRITE, creating or truncating.
    pub fn write_overwrite() -> Self {
        Self {
            read: false,
            write: true,
            disposition: CreateDisposition::OverwriteIf,
        }
    }
}

/// One raw record of a directory listing, as the server returns it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmbDirEntry {
    pub file_name: String,
    pub file_attributes: u32,
    pub end_of_file: u64,
    pub allocation_size: u64,
    /// Windows FILETIME
    pub change_time: u64,
}

impl SmbDirEntry {
    pub fn is_directory(&self) -> bool {
        self.file_attributes & FILE_ATTRIBUTE_DIRECTORY != 0
    }
}

/// Converts a Windows FILETIME to UTC, clamping pre-1970 stamps to the epoch.
pub fn filetime_to_datetime(filetime: u64) -> DateTime<Utc> {
    let since_epoch = filetime.saturating_sub(FILETIME_UNIX_EPOCH);
    let secs = (since_epoch / FILETIME_TICKS_PER_SEC) as i64;
    let nanos = ((since_epoch % FILETIME_TICKS_PER_SEC) * 100) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Converts a UTC timestamp to a Windows FILETIME, saturating at `u64::MAX`.
pub fn datetime_to_filetime(time: DateTime<Utc>) -> u64 {
    let secs = time.timestamp().max(0) as u64;
    let ticks = u64::from(time.timestamp_subsec_nanos()) / 100;
    secs.saturating_mul(FILETIME_TICKS_PER_SEC)
        .saturating_add(ticks)
        .saturating_add(FILETIME_UNIX_EPOCH)
}

/// Capability set of a remote-share client.
///
/// Every id handed out must be released by its matching call
/// (`disconnect`, `logoff`, `tree_disconnect`, `smb_close`); the gateway's
/// session and handle guards take care of that.
pub trait SmbClient: Send + Sync {
    fn connect(&self, host: &str, port: u16) -> Result<SmbConnectionId>;
    fn authenticate(
        &self,
        conn: SmbConnectionId,
        credentials: &SmbCredentials,
    ) -> Result<SmbSessionId>;
    fn tree_connect(&self, session: SmbSessionId, share: &str) -> Result<SmbTreeId>;

    fn tree_disconnect(&self, tree: SmbTreeId) -> Result<()>;
    fn logoff(&self, session: SmbSessionId) -> Result<()>;
    fn disconnect(&self, conn: SmbConnectionId) -> Result<()>;

    /// Raw listing, including the `.` and `..` pseudo-entries.
    fn smb_readdir(&self, tree: SmbTreeId, path: &str) -> Result<Vec<SmbDirEntry>>;
    fn smb_file_exists(&self, tree: SmbTreeId, path: &str) -> Result<bool>;
    fn smb_open(&self, tree: SmbTreeId, path: &str, flags: OpenFlags) -> Result<SmbFileId>;
    fn smb_read(&self, file_id: SmbFileId, offset: u64, len: u32) -> Result<Vec<u8>>;
    fn smb_write(&self, file_id: SmbFileId, offset: u64, data: &[u8]) -> Result<u32>;
    fn smb_close(&self, file_id: SmbFileId) -> Result<()>;
    fn smb_unlink(&self, tree: SmbTreeId, path: &str) -> Result<()>;
}
