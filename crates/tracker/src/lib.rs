pub mod error;
pub mod http;
pub mod udp;

use std::net::SocketAddr;
use std::time::Duration;

pub use error::TrackerError;
use swarmcore_core::Id20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnounceEvent {
    None,
    Started,
    Completed,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    pub info_hash: Id20,
    pub peer_id: Id20,
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: AnnounceEvent,
    /// Random per-session key some trackers use to recognize a client
    /// across IP changes.
    pub key: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceResponse {
    pub interval: Duration,
    pub leechers: Option<u32>,
    pub seeders: Option<u32>,
    pub peers: Vec<SocketAddr>,
}

/// Dispatch an announce to `tracker_url`, picking HTTP(S) or UDP transport
/// from the URL scheme.
pub async fn announce(
    tracker_url: &str,
    request: &AnnounceRequest,
) -> Result<AnnounceResponse, TrackerError> {
    let url = url::Url::parse(tracker_url)
        .map_err(|_| TrackerError::UnsupportedScheme(tracker_url.to_owned()))?;
    match url.scheme() {
        "http" | "https" => http::announce(&url, request).await,
        "udp" => udp::announce(&url, request).await,
        other => Err(TrackerError::UnsupportedScheme(other.to_owned())),
    }
}
