//! Release feed client
//!
//! Firmware descriptors normally come from a JSON endpoint. When that is
//! unset or unreachable the configured fallback list is served instead, and
//! the result says so: fallback data is never passed off as live.

use serde::Deserialize;

use wf_core::config::ReleaseConfig;
use wf_core::error::FeedError;
use wf_core::types::FirmwareDescriptor;

/// Releases together with where they came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Releases {
    /// Fetched from the feed just now
    Live(Vec<FirmwareDescriptor>),
    /// Configured fallback, served because the feed was unavailable
    Fallback {
        releases: Vec<FirmwareDescriptor>,
        reason: String,
    },
}

impl Releases {
    pub fn releases(&self) -> &[FirmwareDescriptor] {
        match self {
            Releases::Live(releases) => releases,
            Releases::Fallback { releases, .. } => releases,
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Releases::Live(_))
    }

    /// Releases whose compatibility tags accept `board_name`
    pub fn for_board(&self, board_name: &str) -> Vec<&FirmwareDescriptor> {
        self.releases()
            .iter()
            .filter(|release| release.supports_board(board_name))
            .collect()
    }

    /// Release with exactly this version string
    pub fn find_version(&self, version: &str) -> Option<&FirmwareDescriptor> {
        self.releases().iter().find(|release| release.version == version)
    }
}

/// Feeds publish either a bare list or an object with a `releases` key
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeedDocument {
    List(Vec<FirmwareDescriptor>),
    Wrapped { releases: Vec<FirmwareDescriptor> },
}

/// Reads firmware descriptors from the configured feed
pub struct ReleaseFeed {
    client: reqwest::Client,
    config: ReleaseConfig,
}

impl ReleaseFeed {
    pub fn new(config: ReleaseConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Fetch the live feed, falling back to configured releases on failure
    pub async fn fetch(&self) -> Result<Releases, FeedError> {
        let reason = match &self.config.feed_url {
            Some(url) => match self.fetch_live(url).await {
                Ok(releases) => {
                    tracing::info!("Release feed returned {} release(s)", releases.len());
                    return Ok(Releases::Live(releases));
                }
                Err(e) => {
                    tracing::warn!("Release feed unavailable: {}", e);
                    e.to_string()
                }
            },
            None => "no release feed configured".to_string(),
        };

        if self.config.fallback.is_empty() {
            return Err(FeedError::Empty);
        }

        tracing::info!(
            "Using {} fallback release(s): {}",
            self.config.fallback.len(),
            reason
        );
        Ok(Releases::Fallback {
            releases: self.config.fallback.clone(),
            reason,
        })
    }

    async fn fetch_live(&self, url: &str) -> Result<Vec<FirmwareDescriptor>, FeedError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| FeedError::Http(e.to_string()))?;

        let body = response
            .text()
            .await
            .map_err(|e| FeedError::Http(e.to_string()))?;

        parse_feed(&body)
    }
}

/// Parse a feed document
pub fn parse_feed(body: &str) -> Result<Vec<FirmwareDescriptor>, FeedError> {
    let document: FeedDocument =
        serde_json::from_str(body).map_err(|e| FeedError::Parse(e.to_string()))?;
    Ok(match document {
        FeedDocument::List(releases) => releases,
        FeedDocument::Wrapped { releases } => releases,
    })
}
