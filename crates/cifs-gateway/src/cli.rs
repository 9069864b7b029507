//! Command-line front end over [`ShareService`].

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::CifsConfig;
use crate::mounted::MountedShareClient;
use crate::service::ShareService;
use crate::transform::TransformItem;

#[derive(Parser, Debug)]
#[command(name = "cifs-gateway")]
#[command(about = "Browse, fetch and transform files on CIFS shares", long_about = None)]
pub struct Cli {
    /// TOML or JSON configuration file
    #[arg(short, long, env = "CIFS_CONFIG")]
    pub config: Option<PathBuf>,

    /// Overrides the directory the shares are mounted under
    #[arg(long)]
    pub mount_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List a directory as a JSON array
    List {
        share: String,
        #[arg(default_value = "")]
        path: String,
        /// `changetime` sorts by ascending change time
        #[arg(short, long)]
        sort: Option<String>,
    },
    /// Download one file
    Get {
        share: String,
        path: String,
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Convert remote XML files listed in a JSON items file
    Transform { share: String, items: PathBuf },
    /// Remove a file; absent files are ignored
    Rm { share: String, path: String },
    /// Move a file within a share
    Mv {
        share: String,
        from: String,
        to: String,
    },
}

fn read_items(path: &Path) -> Result<Vec<TransformItem>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(io::BufReader::new(file))
        .with_context(|| format!("parsing transform items from {}", path.display()))
}

impl Cli {
    /// Resolves the effective configuration: file, environment, then flags.
    pub fn load_config(&self) -> Result<CifsConfig> {
        let mut config = CifsConfig::load(self.config.as_deref())?;
        if let Some(ref root) = self.mount_root {
            config.mount_root = root.clone();
        }
        config.validate()?;
        Ok(config)
    }

    /// Builds the service against the mounted shares and runs the command.
    ///
    /// Blocking; the binary calls this from the blocking pool.
    pub fn run(self) -> Result<()> {
        let config = self.load_config()?;
        tracing::debug!(?config, "configuration loaded");
        let client = Arc::new(MountedShareClient::new(config.mount_root.clone()));
        let service = ShareService::new(Arc::new(config), client);
        let stdout = io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        self.command.execute(&service, &mut out)?;
        out.flush()?;
        Ok(())
    }
}

impl Command {
    /// Runs the command on `service`, writing results to `out`.
    pub fn execute<W: Write>(&self, service: &ShareService, out: &mut W) -> Result<()> {
        match self {
            Command::List { share, path, sort } => {
                let entries = service.list_entries(share, path, sort.as_deref())?;
                serde_json::to_writer_pretty(&mut *out, &entries)?;
                writeln!(out)?;
            }
            Command::Get {
                share,
                path,
                output,
            } => {
                let fetched = service.fetch_file(share, path)?;
                match output {
                    Some(target) => {
                        std::fs::write(target, &fetched.bytes)
                            .with_context(|| format!("writing {}", target.display()))?;
                        tracing::info!(
                            file = %fetched.file_name,
                            bytes = fetched.bytes.len(),
                            target = %target.display(),
                            "saved"
                        );
                    }
                    None => out.write_all(&fetched.bytes)?,
                }
            }
            Command::Transform { share, items } => {
                let items = read_items(items)?;
                service.transform_batch(share, &items, out)?;
                writeln!(out)?;
            }
            Command::Rm { share, path } => service.delete_file(share, path)?,
            Command::Mv { share, from, to } => service.move_file(share, from, to)?,
        }
        Ok(())
    }
}
