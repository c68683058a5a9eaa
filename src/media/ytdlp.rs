use super::{
    provision::binary_path,
    source::MetadataSource,
    types::{Platform, VideoInfo},
};
use crate::config::YtDlpConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::process::Command;
use tracing::{debug, info, warn};

pub struct YtDlp {
    binary_dir: PathBuf,
    platform: Platform,
    metadata_timeout: Duration,
}

impl YtDlp {
    pub fn new(binary_dir: &Path, platform: Platform, metadata_timeout: Duration) -> Self {
        Self {
            binary_dir: binary_dir.to_path_buf(),
            platform,
            metadata_timeout,
        }
    }

    pub fn from_config(config: &YtDlpConfig) -> Self {
        Self::new(
            &config.binary_dir,
            Platform::current(),
            Duration::from_secs(config.metadata_timeout_secs),
        )
    }

    /// Path of the provisioned executable, whether or not it exists yet
    pub fn binary_path(&self) -> PathBuf {
        binary_path(&self.binary_dir, self.platform)
    }

    /// The provisioned binary when present, otherwise whatever `yt-dlp` is
    /// on PATH.
    fn program(&self) -> PathBuf {
        let provisioned = self.binary_path();
        if provisioned.is_file() {
            provisioned
        } else {
            debug!(
                "No provisioned yt-dlp at {}, falling back to PATH",
                provisioned.display()
            );
            PathBuf::from("yt-dlp")
        }
    }

    pub async fn test_availability(&self) -> bool {
        let program = self.program();
        match Command::new(&program).arg("--version").output().await {
            Ok(output) => {
                if output.status.success() {
                    let version = String::from_utf8_lossy(&output.stdout);
                    info!(
                        "✅ yt-dlp is available at {}, version: {}",
                        program.display(),
                        version.trim()
                    );
                    true
                } else {
                    warn!("❌ yt-dlp command failed");
                    false
                }
            }
            Err(e) => {
                warn!("❌ yt-dlp not found: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl MetadataSource for YtDlp {
    fn name(&self) -> &'static str {
        "yt-dlp"
    }

    async fn fetch_info(&self, url: &str) -> Result<VideoInfo> {
        debug!("Extracting metadata with yt-dlp for: {}", url);

        let output = tokio::time::timeout(
            self.metadata_timeout,
            Command::new(self.program())
                .arg("--dump-json")
                .arg("--no-download")
                .arg("--no-warnings")
                .arg("--")
                .arg(url)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .context("Media metadata extraction timed out")?
        .context("Failed to extract media metadata")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow::anyhow!(
                "Media metadata extraction failed: {}",
                error.trim()
            ));
        }

        let json: Value =
            serde_json::from_slice(&output.stdout).context("Failed to parse media metadata")?;
        let info = VideoInfo::from_json(json).context("Unexpected media metadata format")?;

        info!(
            "Fetched metadata for {}: {} ({} formats)",
            url,
            info.title,
            info.formats.len()
        );
        Ok(info)
    }
}
