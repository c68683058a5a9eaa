use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::types::Platform;
use crate::config::{ProvisionConfig, StrategyKind};

/// Upper bound for a single backoff sleep
const MAX_RETRY_DELAY: Duration = Duration::from_secs(600);

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("Invalid download URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("Failed to download {url}: HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Download URL {url} returned HTML instead of a binary")]
    HtmlPayload { url: String },

    #[error("Giving up on {url} after {attempts} attempts (last status HTTP {status})")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        status: u16,
    },

    #[error("Redirect from {url} has no Location header")]
    MissingLocation { url: String },

    #[error("Stopped after {0} redirects")]
    TooManyRedirects(u32),

    #[error("Failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Where the provisioned executable for `platform` lives inside `dir`.
pub fn binary_path(dir: &Path, platform: Platform) -> PathBuf {
    dir.join(platform.binary_name())
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub location: Option<String>,
    pub body: Vec<u8>,
}

impl FetchResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn is_html(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"))
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchResponse, ProvisionError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// With `follow_redirects` off, 3xx responses are returned as-is so a
    /// strategy can follow them itself.
    pub fn new(follow_redirects: bool) -> Result<Self, ProvisionError> {
        let policy = if follow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let client = reqwest::Client::builder()
            .redirect(policy)
            .user_agent(concat!("qrtube/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProvisionError::Network {
                url: String::new(),
                message: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchResponse, ProvisionError> {
        let network = |e: reqwest::Error| ProvisionError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().await.map_err(network)?;
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string())
        };

        let status = response.status().as_u16();
        let content_type = header(reqwest::header::CONTENT_TYPE);
        let location = header(reqwest::header::LOCATION);
        let body = response.bytes().await.map_err(network)?.to_vec();

        Ok(FetchResponse {
            status,
            content_type,
            location,
            body,
        })
    }
}

/// How the release asset is fetched. Both strategies end in the same
/// validation and install step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionStrategy {
    /// Retry 429/503 with exponentially growing delays.
    Backoff {
        max_attempts: u32,
        base_delay: Duration,
    },
    /// Re-issue the request against `Location` on 301/302.
    FollowRedirects { max_redirects: u32 },
}

impl AcquisitionStrategy {
    pub fn from_config(config: &ProvisionConfig) -> Self {
        match config.strategy {
            StrategyKind::Backoff => AcquisitionStrategy::Backoff {
                max_attempts: config.max_attempts.max(1),
                base_delay: Duration::from_millis(config.base_delay_ms),
            },
            StrategyKind::FollowRedirects => AcquisitionStrategy::FollowRedirects {
                max_redirects: config.max_redirects,
            },
        }
    }

    /// Backoff leaves redirects to the HTTP client; the redirect strategy
    /// needs to see them.
    fn client_follows_redirects(&self) -> bool {
        matches!(self, AcquisitionStrategy::Backoff { .. })
    }

    async fn acquire(
        &self,
        fetcher: &dyn Fetcher,
        url: &str,
    ) -> Result<(String, FetchResponse), ProvisionError> {
        match self {
            AcquisitionStrategy::Backoff {
                max_attempts,
                base_delay,
            } => {
                let mut attempt = 1;
                loop {
                    let response = fetcher.get(url).await?;
                    if !is_transient(response.status) {
                        return Ok((url.to_string(), response));
                    }

                    if attempt >= *max_attempts {
                        return Err(ProvisionError::RetriesExhausted {
                            url: url.to_string(),
                            attempts: attempt,
                            status: response.status,
                        });
                    }

                    let delay = backoff_delay(*base_delay, attempt);
                    warn!(
                        "HTTP {} from {}, retrying in {}ms (attempt {}/{})",
                        response.status,
                        url,
                        delay.as_millis(),
                        attempt,
                        max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
            AcquisitionStrategy::FollowRedirects { max_redirects } => {
                let mut current = Url::parse(url).map_err(|e| ProvisionError::InvalidUrl {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;

                for _ in 0..=*max_redirects {
                    let response = fetcher.get(current.as_str()).await?;
                    if !matches!(response.status, 301 | 302) {
                        return Ok((current.to_string(), response));
                    }

                    let location =
                        response
                            .location
                            .as_deref()
                            .ok_or_else(|| ProvisionError::MissingLocation {
                                url: current.to_string(),
                            })?;
                    let next = current
                        .join(location)
                        .map_err(|e| ProvisionError::InvalidUrl {
                            url: location.to_string(),
                            reason: e.to_string(),
                        })?;
                    debug!("Following redirect {} -> {}", current, next);
                    current = next;
                }

                Err(ProvisionError::TooManyRedirects(*max_redirects))
            }
        }
    }
}

/// `base * 2^(attempt - 1)`, capped at [`MAX_RETRY_DELAY`].
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    2u32.checked_pow(attempt.saturating_sub(1))
        .and_then(|factor| base.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY, |delay| delay.min(MAX_RETRY_DELAY))
}

fn is_transient(status: u16) -> bool {
    matches!(status, 429 | 503)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Installed(PathBuf),
    /// The running platform is not the one this deployment targets.
    Skipped,
}

pub struct Provisioner {
    fetcher: Box<dyn Fetcher>,
    strategy: AcquisitionStrategy,
    target: Platform,
    binary_dir: PathBuf,
    release_url: Option<String>,
}

impl Provisioner {
    pub fn new(
        fetcher: Box<dyn Fetcher>,
        strategy: AcquisitionStrategy,
        target: Platform,
        binary_dir: PathBuf,
    ) -> Self {
        Self {
            fetcher,
            strategy,
            target,
            binary_dir,
            release_url: None,
        }
    }

    pub fn from_config(
        config: &ProvisionConfig,
        binary_dir: &Path,
    ) -> Result<Self, ProvisionError> {
        let strategy = AcquisitionStrategy::from_config(config);
        let fetcher = HttpFetcher::new(strategy.client_follows_redirects())?;

        Ok(Self::new(
            Box::new(fetcher),
            strategy,
            config.target_platform,
            binary_dir.to_path_buf(),
        )
        .with_release_url(config.release_url.clone()))
    }

    pub fn with_release_url(mut self, release_url: Option<String>) -> Self {
        self.release_url = release_url;
        self
    }

    /// Downloads and installs yt-dlp for `platform`, overwriting any
    /// previous copy. A no-op when `platform` is not the deployment target.
    pub async fn ensure_binary(
        &self,
        platform: Platform,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        if platform != self.target {
            info!(
                "Not running on {}, skipping standalone yt-dlp download",
                self.target.as_str()
            );
            return Ok(ProvisionOutcome::Skipped);
        }

        let path = binary_path(&self.binary_dir, platform);
        let io_error = |source| ProvisionError::Io {
            path: path.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.binary_dir)
            .await
            .map_err(|source| ProvisionError::Io {
                path: self.binary_dir.clone(),
                source,
            })?;

        let url = self
            .release_url
            .as_deref()
            .unwrap_or_else(|| platform.release_url());
        info!(
            "Downloading standalone yt-dlp binary for {} from {}",
            platform.as_str(),
            url
        );

        let (final_url, response) = self.strategy.acquire(self.fetcher.as_ref(), url).await?;

        if !response.is_success() {
            return Err(ProvisionError::Status {
                url: final_url,
                status: response.status,
            });
        }
        if response.is_html() {
            return Err(ProvisionError::HtmlPayload { url: final_url });
        }

        tokio::fs::write(&path, &response.body)
            .await
            .map_err(io_error)?;
        info!("Download complete, wrote {} bytes", response.body.len());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .await
                .map_err(io_error)?;
            info!("Made binary executable");
        }

        info!("✅ yt-dlp installed at {}", path.display());
        Ok(ProvisionOutcome::Installed(path))
    }
}
