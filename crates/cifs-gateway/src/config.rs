//! Gateway configuration

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};
use crate::smb::{SmbCredentials, DEFAULT_SMB_PORT};

/// Directory name used under the system temp dir for staged files.
pub const STAGING_NAMESPACE: &str = "cifs-gateway";

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CifsConfig {
    pub hostname: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub domain: String,
    /// Remove the remote file after a plain download succeeds.
    pub delete_file_after_download: bool,
    pub staging_dir: PathBuf,
    /// Where the mounted share backend finds `<share>` directories.
    pub mount_root: PathBuf,
}

impl Default for CifsConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: DEFAULT_SMB_PORT,
            username: String::new(),
            password: String::new(),
            domain: "WORKGROUP".to_string(),
            delete_file_after_download: false,
            staging_dir: std::env::temp_dir().join(STAGING_NAMESPACE),
            mount_root: PathBuf::from("/mnt/cifs"),
        }
    }
}

impl std::fmt::Debug for CifsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CifsConfig")
            .field("hostname", &self.hostname)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"*".repeat(self.password.chars().count()))
            .field("domain", &self.domain)
            .field("delete_file_after_download", &self.delete_file_after_download)
            .field("staging_dir", &self.staging_dir)
            .field("mount_root", &self.mount_root)
            .finish()
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(GatewayError::Config {
            reason: format!("{} must be a boolean, got {:?}", key, other),
        }),
    }
}

impl CifsConfig {
    /// Loads a TOML or JSON file, chosen by extension.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| GatewayError::Config {
                reason: format!("{}: {}", path.display(), e),
            }),
            "json" => Ok(serde_json::from_str(&contents)?),
            _ => Err(GatewayError::Config {
                reason: format!("unsupported config file extension: {}", ext),
            }),
        }
    }

    /// Overrides fields from `CIFS_*` variables found through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CIFS_HOSTNAME") {
            self.hostname = v;
        }
        if let Some(v) = lookup("CIFS_PORT") {
            self.port = v.trim().parse().map_err(|_| GatewayError::Config {
                reason: format!("CIFS_PORT must be a port number, got {:?}", v),
            })?;
        }
        if let Some(v) = lookup("CIFS_USERNAME") {
            self.username = v;
        }
        if let Some(v) = lookup("CIFS_PASSWORD") {
            self.password = v;
        }
        if let Some(v) = lookup("CIFS_DOMAIN") {
            self.domain = v;
        }
        if let Some(v) = lookup("CIFS_DELETE_FILE_AFTER_DOWNLOAD") {
            self.delete_file_after_download = parse_bool("CIFS_DELETE_FILE_AFTER_DOWNLOAD", &v)?;
        }
        if let Some(v) = lookup("CIFS_STAGING_DIR") {
            self.staging_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CIFS_MOUNT_ROOT") {
            self.mount_root = PathBuf::from(v);
        }
        Ok(())
    }

    /// Defaults, then `path` if it exists, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => Self::from_file(p)?,
            Some(p) => {
                tracing::warn!("Config file not found, using defaults: {}", p.display());
                Self::default()
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn credentials(&self) -> SmbCredentials {
        SmbCredentials::new(&self.username, &self.password, &self.domain)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname.is_empty() {
            return Err(GatewayError::Config {
                reason: "hostname must be set".to_string(),
            });
        }

        if self.port == 0 {
            return Err(GatewayError::Config {
                reason: "port cannot be 0".to_string(),
            });
        }

        if self.username.is_empty() {
            return Err(GatewayError::Config {
                reason: "username must be set".to_string(),
            });
        }

        if self.staging_dir.as_os_str().is_empty() {
            return Err(GatewayError::Config {
                reason: "staging directory cannot be empty".to_string(),
            });
        }

        Ok(())
    }
}
