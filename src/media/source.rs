use super::types::VideoInfo;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// Human-readable name of the extractor
    fn name(&self) -> &'static str;

    /// Fetch the title and format catalog for the given URL
    async fn fetch_info(&self, url: &str) -> Result<VideoInfo>;
}
