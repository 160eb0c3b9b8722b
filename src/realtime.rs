use gtfs_realtime::FeedMessage;
use prost::Message;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedKind {
    Alerts,
    TripUpdates,
    VehiclePositions,
}

impl FeedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedKind::Alerts => "alerts",
            FeedKind::TripUpdates => "trip_updates",
            FeedKind::VehiclePositions => "vehicle_positions",
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch GTFS-RT feed: {0}")]
    Upstream(String),
    #[error("GTFS-RT feed timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),
    #[error("failed to parse GTFS-RT feed: {0}")]
    Decode(#[from] prost::DecodeError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeedUrls {
    pub alerts: String,
    pub trip_updates: String,
    pub vehicle_positions: String,
}

impl FeedUrls {
    pub fn from_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            alerts: format!("{}/Alerts.pb", base),
            trip_updates: format!("{}/TripUpdate.pb", base),
            vehicle_positions: format!("{}/VehiclePosition.pb", base),
        }
    }

    pub fn url(&self, kind: FeedKind) -> &str {
        match kind {
            FeedKind::Alerts => &self.alerts,
            FeedKind::TripUpdates => &self.trip_updates,
            FeedKind::VehiclePositions => &self.vehicle_positions,
        }
    }
}

/// Fetches and decodes GTFS-RT feeds. Every call is a fresh upstream request.
pub struct RealtimeFetcher {
    client: reqwest::Client,
    urls: FeedUrls,
    timeout: Duration,
}

impl RealtimeFetcher {
    pub fn new(urls: FeedUrls) -> Self {
        Self::with_timeout(urls, FETCH_TIMEOUT)
    }

    pub fn with_timeout(urls: FeedUrls, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            urls,
            timeout,
        }
    }

    pub async fn fetch(&self, kind: FeedKind) -> Result<FeedMessage, FetchError> {
        let url = self.urls.url(kind);
        let result = match tokio::time::timeout(self.timeout, self.fetch_bytes(url)).await {
            Ok(Ok(bytes)) => decode_feed(&bytes),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };

        match &result {
            Ok(feed) => debug!(feed = kind.as_str(), entities = feed.entity.len(), "Fetched feed"),
            Err(e) => warn!(feed = kind.as_str(), url, error = %e, "Feed fetch failed"),
        }
        result
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout)
            } else {
                FetchError::Upstream(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Upstream(format!(
                "bad response status: {}",
                response.status().as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::Upstream(format!("failed to read GTFS-RT data: {}", e)))?;
        Ok(bytes.to_vec())
    }
}

pub fn decode_feed(bytes: &[u8]) -> Result<FeedMessage, FetchError> {
    Ok(FeedMessage::decode(bytes)?)
}
