//! Session-wide tunables. Every numeric constant a peer connection or the
//! scheduler depends on lives here, as a field with a documented default,
//! rather than a bare literal scattered across call sites.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmConfig {
    pub max_peers: usize,
    pub max_half_open: usize,
    pub max_piece_buffers: usize,
    pub min_pipeline_depth: usize,
    pub max_pipeline_depth: usize,
    pub block_size: u32,
    pub keepalive_send_interval: Duration,
    pub keepalive_timeout: Duration,
    pub choke_interval: Duration,
    pub optimistic_unchoke_interval: Duration,
    pub stall_threshold: Duration,
    pub min_tracker_interval: Duration,
    pub max_tracker_interval: Duration,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_peers: 80,
            max_half_open: 8,
            max_piece_buffers: 16,
            min_pipeline_depth: 2,
            max_pipeline_depth: 256,
            block_size: crate::lengths::DEFAULT_BLOCK_SIZE,
            keepalive_send_interval: Duration::from_secs(120),
            keepalive_timeout: Duration::from_secs(150),
            choke_interval: Duration::from_secs(10),
            optimistic_unchoke_interval: Duration::from_secs(30),
            stall_threshold: Duration::from_secs(30),
            min_tracker_interval: Duration::from_secs(30),
            max_tracker_interval: Duration::from_secs(3600),
        }
    }
}

impl SwarmConfig {
    pub fn clamp_pipeline_depth(&self, requested: usize) -> usize {
        requested.clamp(self.min_pipeline_depth, self.max_pipeline_depth)
    }

    pub fn clamp_tracker_interval(&self, requested: Duration) -> Duration {
        requested.clamp(self.min_tracker_interval, self.max_tracker_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let c = SwarmConfig::default();
        assert_eq!(c.max_peers, 80);
        assert_eq!(c.max_half_open, 8);
        assert_eq!(c.max_piece_buffers, 16);
        assert_eq!(c.block_size, 16384);
    }

    #[test]
    fn clamp_pipeline_depth_respects_bounds() {
        let c = SwarmConfig::default();
        assert_eq!(c.clamp_pipeline_depth(0), 2);
        assert_eq!(c.clamp_pipeline_depth(1000), 256);
        assert_eq!(c.clamp_pipeline_depth(10), 10);
    }

    #[test]
    fn clamp_tracker_interval_respects_bounds() {
        let c = SwarmConfig::default();
        assert_eq!(c.clamp_tracker_interval(Duration::from_secs(1)), c.min_tracker_interval);
        assert_eq!(c.clamp_tracker_interval(Duration::from_secs(999_999)), c.max_tracker_interval);
    }
}
