use crate::gtfs_types::NumericPolicy;
use crate::realtime::FeedUrls;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_DATA_DIR: &str = "./data/gtfs";
const DEFAULT_RT_BASE_URL: &str = "https://www.rtd-denver.com/files/gtfs-rt";
const DEFAULT_REFRESH_SECS: u64 = 3600;

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub feeds: FeedUrls,
    /// `None` disables periodic re-ingestion.
    pub refresh_interval: Option<Duration>,
    pub numeric_policy: NumericPolicy,
}

impl Config {
    /// Reads `.env` if present, then the process environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match var("PORT").or_else(|| var("GIN_PORT")) {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("Invalid PORT value {:?}", raw))?,
            None => DEFAULT_PORT,
        };

        let data_dir = var("GTFS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));

        let base = var("GTFS_RT_BASE_URL").unwrap_or_else(|| DEFAULT_RT_BASE_URL.to_string());
        let mut feeds = FeedUrls::from_base(&base);
        if let Some(url) = var("GTFS_RT_ALERTS_URL") {
            feeds.alerts = url;
        }
        if let Some(url) = var("GTFS_RT_TRIP_UPDATES_URL") {
            feeds.trip_updates = url;
        }
        if let Some(url) = var("GTFS_RT_VEHICLE_POSITIONS_URL") {
            feeds.vehicle_positions = url;
        }

        let refresh_secs = match var("GTFS_REFRESH_SECS") {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("Invalid GTFS_REFRESH_SECS value {:?}", raw))?,
            None => DEFAULT_REFRESH_SECS,
        };
        let refresh_interval = (refresh_secs > 0).then(|| Duration::from_secs(refresh_secs));

        let numeric_policy = match var("GTFS_STRICT_NUMERIC").as_deref().map(str::trim) {
            Some("1") | Some("true") | Some("TRUE") | Some("yes") => NumericPolicy::Strict,
            _ => NumericPolicy::Lenient,
        };

        Ok(Self {
            port,
            data_dir,
            feeds,
            refresh_interval,
            numeric_policy,
        })
    }
}
