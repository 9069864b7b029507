#![warn(missing_docs)]

//! CIFS gateway: share listing, file staging and XML to JSON transform
//! over an SMB client abstraction.

pub mod cli;
pub mod config;
pub mod error;
pub mod listing;
pub mod mounted;
pub mod mutate;
pub mod service;
pub mod session;
pub mod smb;
pub mod staging;
pub mod transform;
pub mod xml_json;

pub use config::CifsConfig;
pub use error::{GatewayError, Result};
pub use listing::{DirectoryEntry, SortKey};
pub use mounted::MountedShareClient;
pub use service::{FetchedFile, ShareService, FETCH_CONTENT_TYPE};
pub use session::{ConnectedShare, SessionManager, ShareSession};
pub use smb::{SmbClient, SmbCredentials};
pub use staging::{RemotePolicy, StagedFile, StagingArea, StagingScope};
pub use transform::{TransformItem, TRANSFORM_CONTENT_TYPE};
