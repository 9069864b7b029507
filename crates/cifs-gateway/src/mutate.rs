//! Remote file removal and move.

use std::io::{self, BufReader};

use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::session::ConnectedShare;
use crate::smb::OpenFlags;

const COPY_BUFFER_SIZE: usize = 65_536;

/// Case-folded components of a share path. Separator style, doubled
/// separators and `.` parts don't change the key.
fn path_key(path: &str) -> Vec<String> {
    path.split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .map(str::to_lowercase)
        .collect()
}

/// True if both paths name the same file on a case-insensitive share.
pub fn same_remote_path(a: &str, b: &str) -> bool {
    path_key(a) == path_key(b)
}

/// Removes `path` if it exists. A missing file is not an error.
pub fn remove(share: &ConnectedShare, path: &str) -> Result<()> {
    if share.file_exists(path)? {
        share.rm(path)?;
        debug!(share = share.name(), path, "removed");
    }
    Ok(())
}

/// Moves `old_path` to `new_path` within one share by copy + delete.
///
/// Not atomic. If the copy fails the destination may be truncated while the
/// source stays intact; if removing the source fails both files exist.
pub fn move_file(share: &ConnectedShare, old_path: &str, new_path: &str) -> Result<()> {
    if same_remote_path(old_path, new_path) {
        return Err(GatewayError::invalid_argument(format!(
            "cannot move {} onto itself",
            old_path
        )));
    }
    if !share.file_exists(old_path)? {
        return Err(GatewayError::SourceNotFound {
            path: old_path.to_string(),
        });
    }

    let source = share.open(old_path, OpenFlags::read_existing())?;
    let mut destination = share.open(new_path, OpenFlags::write_overwrite())?;
    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, source);
    let copied = io::copy(&mut reader, &mut destination).map_err(GatewayError::from_io)?;
    reader.into_inner().close()?;
    destination.close()?;

    remove(share, old_path)?;
    debug!(share = share.name(), old_path, new_path, bytes = copied, "moved");
    Ok(())
}
