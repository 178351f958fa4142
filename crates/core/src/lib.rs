pub mod bitfield;
pub mod config;
pub mod conn_timing;
pub mod id20;
pub mod lengths;
pub mod magnet;
pub mod metainfo;
pub mod peer;
pub mod peer_id;
pub mod rtt;
pub mod speed_estimator;

pub use bitfield::Bitfield;
pub use config::SwarmConfig;
pub use conn_timing::ConnTimingTracker;
pub use id20::Id20;
pub use lengths::{ChunkInfo, Lengths};
pub use magnet::Magnet;
pub use metainfo::Metainfo;
pub use rtt::RttEstimator;
pub use speed_estimator::SpeedEstimator;
