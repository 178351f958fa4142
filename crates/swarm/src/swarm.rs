//! The top-level orchestrator: wires together the disk manager, the
//! scheduler actor, tracker re-announces, and peer connection lifecycles,
//! and exposes a single [`SwarmEvent`] stream to the caller.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use swarmcore_core::metainfo::Metainfo;
use swarmcore_core::{peer_id::generate_peer_id, Bitfield, ConnTimingTracker, Id20, Lengths, SwarmConfig};
use swarmcore_sha1::Hasher;
use swarmcore_tracker::{AnnounceEvent, AnnounceRequest};
use swarmcore_wire::Handshake;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::disk_manager::DiskManager;
use crate::error::SwarmError;
use crate::events::SwarmEvent;
use crate::filesystem::Filesystem;
use crate::peer_connection::{self, PeerCommand, PeerEvent};
use crate::scheduler::{Scheduler, SchedulerMessage};
use crate::socket::SocketFactory;

pub struct SwarmHandle {
    pub events: mpsc::Receiver<SwarmEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl SwarmHandle {
    /// Stop all background tasks. Events already queued remain readable
    /// from `events` until the channel drains.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

pub struct Swarm {
    pub metainfo: Metainfo,
    pub listen_port: u16,
    pub config: SwarmConfig,
}

impl Swarm {
    pub fn new(metainfo: Metainfo, listen_port: u16, config: SwarmConfig) -> Self {
        Self { metainfo, listen_port, config }
    }

    /// Start downloading/seeding. Spawns the scheduler actor, a tracker
    /// announce loop, and a listener accept loop, wiring each newly
    /// connected peer's connection task into the scheduler.
    pub fn start(
        self,
        fs: Arc<dyn Filesystem>,
        hasher: Arc<dyn Hasher>,
        clock: Arc<dyn Clock>,
        sockets: Arc<dyn SocketFactory>,
        download_dir: &Path,
    ) -> Result<SwarmHandle, SwarmError> {
        let lengths = Lengths::with_block_size(
            self.metainfo.info.total_length(),
            self.metainfo.info.piece_length,
            self.config.block_size,
        )
        .map_err(|e| SwarmError::Protocol(e.to_string()))?;

        let disk = Arc::new(DiskManager::new(fs, &self.metainfo.info, lengths, download_dir)?);
        let have = Bitfield::new(lengths.total_pieces());

        let (events_tx, events_rx) = mpsc::channel(256);
        let (scheduler_tx, scheduler_rx) = mpsc::channel(1024);

        let scheduler = Scheduler::new(
            lengths,
            self.metainfo.info.pieces.clone(),
            have,
            disk,
            hasher,
            self.config.clone(),
            clock.clone(),
            events_tx.clone(),
        );

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(scheduler.run(scheduler_rx)));
        tasks.push(tokio::spawn(tick_loop(scheduler_tx.clone(), self.config.choke_interval)));

        let peer_id = generate_peer_id();
        let info_hash = self.metainfo.info_hash;
        let trackers = self.metainfo.all_trackers();
        let conn_timing = Arc::new(ConnTimingTracker::new());
        let half_open = Arc::new(Semaphore::new(self.config.max_half_open));
        tasks.push(tokio::spawn(tracker_loop(
            trackers,
            info_hash,
            peer_id,
            self.listen_port,
            self.config.clone(),
            sockets.clone(),
            scheduler_tx.clone(),
            clock.clone(),
            events_tx.clone(),
            conn_timing,
            half_open,
        )));
        tasks.push(tokio::spawn(accept_loop(
            sockets,
            info_hash,
            peer_id,
            self.config.clone(),
            clock,
            scheduler_tx.clone(),
        )));

        Ok(SwarmHandle { events: events_rx, tasks })
    }
}

async fn tick_loop(scheduler_tx: mpsc::Sender<SchedulerMessage>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if scheduler_tx.send(SchedulerMessage::Tick).await.is_err() {
            break;
        }
    }
}

async fn tracker_loop(
    trackers: Vec<String>,
    info_hash: Id20,
    peer_id: Id20,
    listen_port: u16,
    config: SwarmConfig,
    sockets: Arc<dyn SocketFactory>,
    scheduler_tx: mpsc::Sender<SchedulerMessage>,
    clock: Arc<dyn Clock>,
    events_tx: mpsc::Sender<SwarmEvent>,
    conn_timing: Arc<ConnTimingTracker>,
    half_open: Arc<Semaphore>,
) {
    let key: u32 = rand::random();
    let mut event = AnnounceEvent::Started;
    loop {
        let mut connected_any = false;
        for tracker in &trackers {
            let request = AnnounceRequest {
                info_hash,
                peer_id,
                port: listen_port,
                uploaded: 0,
                downloaded: 0,
                left: u64::MAX,
                event,
                key,
            };
            match swarmcore_tracker::announce(tracker, &request).await {
                Ok(response) => {
                    connected_any = true;
                    for addr in response.peers {
                        spawn_outgoing_connection(
                            addr,
                            info_hash,
                            peer_id,
                            config.clone(),
                            sockets.clone(),
                            scheduler_tx.clone(),
                            clock.clone(),
                            conn_timing.clone(),
                            half_open.clone(),
                        );
                    }
                    let wait = config.clamp_tracker_interval(response.interval);
                    event = AnnounceEvent::None;
                    tokio::time::sleep(wait).await;
                }
                Err(e) => {
                    warn!(tracker, error = %e, "tracker announce failed");
                    events_tx
                        .send(SwarmEvent::NonFatalError { message: format!("tracker {tracker} failed: {e}") })
                        .await
                        .ok();
                }
            }
        }
        if !connected_any {
            tokio::time::sleep(config.min_tracker_interval).await;
        }
    }
}

async fn accept_loop(
    sockets: Arc<dyn SocketFactory>,
    info_hash: Id20,
    peer_id: Id20,
    config: SwarmConfig,
    clock: Arc<dyn Clock>,
    scheduler_tx: mpsc::Sender<SchedulerMessage>,
) {
    loop {
        match sockets.accept().await {
            Ok((stream, addr)) => {
                spawn_peer_task(stream, addr, info_hash, peer_id, config.clone(), clock.clone(), scheduler_tx.clone());
            }
            Err(e) => {
                warn!(error = %e, "accept loop error");
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
        }
    }
}

/// Dials `addr` in a new task, bounded by `half_open` (§5's resource cap
/// on concurrent pending outbound connects) — the permit is held only
/// for the TCP dial itself and released the moment it resolves, success
/// or failure, since a peer stops being "half-open" once connect()
/// returns.
fn spawn_outgoing_connection(
    addr: SocketAddr,
    info_hash: Id20,
    peer_id: Id20,
    config: SwarmConfig,
    sockets: Arc<dyn SocketFactory>,
    scheduler_tx: mpsc::Sender<SchedulerMessage>,
    clock: Arc<dyn Clock>,
    conn_timing: Arc<ConnTimingTracker>,
    half_open: Arc<Semaphore>,
) {
    tokio::spawn(async move {
        let Ok(_permit) = half_open.acquire_owned().await else {
            return;
        };
        let started = std::time::Instant::now();
        let attempt = tokio::time::timeout(conn_timing.timeout(), sockets.connect(addr)).await;
        drop(_permit);
        match attempt {
            Ok(Ok(stream)) => {
                conn_timing.record_connect(started.elapsed());
                spawn_peer_task(stream, addr, info_hash, peer_id, config, clock, scheduler_tx)
            }
            Ok(Err(e)) => {
                info!(peer = %addr, error = %e, "outgoing connect failed");
            }
            Err(_) => {
                info!(peer = %addr, timeout = ?conn_timing.timeout(), "outgoing connect timed out");
            }
        }
    });
}

fn spawn_peer_task(
    stream: Box<dyn crate::socket::PeerStream>,
    addr: SocketAddr,
    info_hash: Id20,
    peer_id: Id20,
    config: SwarmConfig,
    clock: Arc<dyn Clock>,
    scheduler_tx: mpsc::Sender<SchedulerMessage>,
) {
    tokio::spawn(async move {
        let (cmd_tx, cmd_rx) = mpsc::channel::<PeerCommand>(256);
        let (event_tx, mut event_rx) = mpsc::channel::<PeerEvent>(256);

        if scheduler_tx.send(SchedulerMessage::PeerConnected { addr, cmd_tx }).await.is_err() {
            return;
        }

        let forward_scheduler_tx = scheduler_tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                if forward_scheduler_tx.send(SchedulerMessage::PeerEvent { addr, event }).await.is_err() {
                    break;
                }
            }
        });

        let handshake = Handshake::new(info_hash, peer_id);
        let conn = peer_connection::PeerConnection::new(addr, config, clock);
        let result = peer_connection::run(stream, conn, handshake, cmd_rx, event_tx).await;
        forward.abort();

        if let Err(e) = result {
            info!(peer = %addr, error = %e, "peer connection ended");
        }
        scheduler_tx.send(SchedulerMessage::PeerDisconnected { addr }).await.ok();
    });
}
