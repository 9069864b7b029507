//! Streaming XML → JSON batch transform over one shared share session.

use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{GatewayError, Result};
use crate::session::ConnectedShare;
use crate::staging::{stage, RemotePolicy, StagingScope};
use crate::xml_json::xml_to_json;

/// Content type of the streamed transform output.
pub const TRANSFORM_CONTENT_TYPE: &str = "application/json";

/// Property injected into every converted document before the root key is
/// extracted.
pub const SOURCE_FILE_NAME_KEY: &str = "source_file_name";

/// One remote XML document to convert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformItem {
    pub file_name: String,
    /// Directory of the file within the share
    pub path: String,
    /// Property whose value becomes the emitted array element
    #[serde(rename = "root")]
    pub xml_root_key: String,
}

impl TransformItem {
    pub fn new(file_name: &str, path: &str, xml_root_key: &str) -> Self {
        Self {
            file_name: file_name.to_string(),
            path: path.to_string(),
            xml_root_key: xml_root_key.to_string(),
        }
    }

    /// Share-relative path of the document.
    pub fn remote_path(&self) -> String {
        format!("{}/{}", self.path.trim_end_matches(['/', '\\']), self.file_name)
    }
}

/// Converts one XML document and returns the value under `root_key`.
///
/// `source_file_name` is added to the top-level wrapper, so it only reaches
/// the output when `root_key` names it.
pub fn convert_document(xml: &str, source_file_name: &str, root_key: &str) -> Result<Value> {
    let mut document = xml_to_json(xml)?;
    document.insert(
        SOURCE_FILE_NAME_KEY.to_string(),
        Value::String(source_file_name.to_string()),
    );
    document
        .remove(root_key)
        .ok_or_else(|| GatewayError::MissingRootKey {
            key: root_key.to_string(),
        })
}

fn transform_item(
    share: &ConnectedShare,
    scope: &StagingScope,
    item: &TransformItem,
) -> Result<Value> {
    let remote_path = item.remote_path();
    // always removes the remote copy, independent of delete_file_after_download
    let staged = stage(share, scope, &remote_path, RemotePolicy::DeleteRemote)?;
    let xml = staged.read_string()?;
    let element = convert_document(&xml, &staged.file_name(), &item.xml_root_key)?;
    staged.remove()?;
    debug!(share = share.name(), remote_path, "transformed");
    Ok(element)
}

fn emit_item<W: Write>(
    share: &ConnectedShare,
    scope: &StagingScope,
    item: &TransformItem,
    first: bool,
    out: &mut W,
) -> Result<()> {
    if !first {
        out.write_all(b",")?;
    }
    let element = transform_item(share, scope, item)?;
    serde_json::to_writer(&mut *out, &element)?;
    Ok(())
}

/// Streams `items` as a JSON array to `out`, in input order.
///
/// Elements are written as soon as they are converted. The first failing
/// item stops the run with `PartialFailure`; whatever was already written
/// stays in `out` and the array is left unterminated. The caller owns
/// `share` and closes it afterwards.
pub fn transform<W: Write>(
    share: &ConnectedShare,
    scope: &StagingScope,
    items: &[TransformItem],
    out: &mut W,
) -> Result<usize> {
    out.write_all(b"[")?;
    for (index, item) in items.iter().enumerate() {
        emit_item(share, scope, item, index == 0, out).map_err(|e| {
            GatewayError::PartialFailure {
                completed: index,
                source: Box::new(e),
            }
        })?;
    }
    out.write_all(b"]")?;
    out.flush()?;
    Ok(items.len())
}
