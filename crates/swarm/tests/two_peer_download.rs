//! End-to-end: a fully-seeded peer and an empty-handed leecher, talking
//! the real wire protocol over an in-memory duplex pipe, driven by two
//! independent scheduler actors. No tracker or real socket involved —
//! connections are wired by hand the way [`swarmcore_swarm::swarm`] wires
//! them in production, minus the network.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use swarmcore_core::metainfo::{FileEntry, Info};
use swarmcore_core::{peer_id::generate_peer_id, Bitfield, Id20, Lengths, SwarmConfig};
use swarmcore_sha1::{hash_one_shot, RealHasher};
use swarmcore_swarm::clock::RealClock;
use swarmcore_swarm::filesystem::{Filesystem, InMemoryFilesystem};
use swarmcore_swarm::peer_connection::{self, PeerCommand, PeerEvent, PeerConnection};
use swarmcore_swarm::scheduler::{Scheduler, SchedulerMessage};
use swarmcore_swarm::{DiskManager, SwarmEvent};
use swarmcore_wire::Handshake;
use tokio::sync::mpsc;

const SEEDER_ADDR: &str = "127.0.0.1:9001";
const LEECHER_ADDR: &str = "127.0.0.1:9002";

fn torrent_info() -> (Info, Lengths, Vec<Id20>, Vec<u8>) {
    let piece_a = b"AAAA".to_vec();
    let piece_b = b"BBBB".to_vec();
    let mut data = piece_a.clone();
    data.extend_from_slice(&piece_b);

    let info = Info {
        name: "two-piece".into(),
        piece_length: 4,
        pieces: vec![Id20::new(hash_one_shot(&piece_a)), Id20::new(hash_one_shot(&piece_b))],
        files: vec![FileEntry { path: "file.bin".into(), length: 8 }],
    };
    let lengths = Lengths::with_block_size(8, 4, 4).unwrap();
    let hashes = info.pieces.clone();
    (info, lengths, hashes, data)
}

fn spawn_peer_side(
    stream: tokio::io::DuplexStream,
    my_id: Id20,
    info_hash: Id20,
    config: SwarmConfig,
    scheduler_tx: mpsc::Sender<SchedulerMessage>,
    remote_addr: SocketAddr,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel::<PeerCommand>(64);
    let (event_tx, mut event_rx) = mpsc::channel::<PeerEvent>(64);

    scheduler_tx.try_send(SchedulerMessage::PeerConnected { addr: remote_addr, cmd_tx }).ok();

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if scheduler_tx.send(SchedulerMessage::PeerEvent { addr: remote_addr, event }).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let conn = PeerConnection::new(remote_addr, config, Arc::new(RealClock));
        let handshake = Handshake::new(info_hash, my_id);
        let _ = peer_connection::run(stream, conn, handshake, cmd_rx, event_tx).await;
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn leecher_downloads_full_torrent_from_a_seeder() {
    let (info, lengths, hashes, data) = torrent_info();
    let info_hash = Id20::new(hash_one_shot(b"fake-info-hash-bytes"));
    let mut config = SwarmConfig::default();
    config.choke_interval = Duration::from_millis(20);
    config.optimistic_unchoke_interval = Duration::from_millis(40);
    config.min_pipeline_depth = 2;

    // Seeder: fully-seeded disk.
    let seeder_fs: Arc<dyn Filesystem> = Arc::new(InMemoryFilesystem::new());
    let seeder_disk = Arc::new(DiskManager::new(seeder_fs, &info, lengths, Path::new("/tmp/seed")).unwrap());
    seeder_disk.write_chunk(0, 0, &data[0..4]).unwrap();
    seeder_disk.write_chunk(1, 0, &data[4..8]).unwrap();
    let mut seeder_have = Bitfield::new(lengths.total_pieces());
    seeder_have.set_have(0);
    seeder_have.set_have(1);

    // Leecher: empty disk.
    let leecher_fs: Arc<dyn Filesystem> = Arc::new(InMemoryFilesystem::new());
    let leecher_disk = Arc::new(DiskManager::new(leecher_fs, &info, lengths, Path::new("/tmp/leech")).unwrap());
    let leecher_have = Bitfield::new(lengths.total_pieces());

    let (seeder_events_tx, mut seeder_events_rx) = mpsc::channel(64);
    let (leecher_events_tx, mut leecher_events_rx) = mpsc::channel(64);
    let (seeder_sched_tx, seeder_sched_rx) = mpsc::channel(256);
    let (leecher_sched_tx, leecher_sched_rx) = mpsc::channel(256);

    let seeder = Scheduler::new(
        lengths,
        hashes.clone(),
        seeder_have,
        seeder_disk.clone(),
        Arc::new(RealHasher),
        config.clone(),
        Arc::new(RealClock),
        seeder_events_tx,
    );
    let leecher = Scheduler::new(
        lengths,
        hashes,
        leecher_have,
        leecher_disk.clone(),
        Arc::new(RealHasher),
        config.clone(),
        Arc::new(RealClock),
        leecher_events_tx,
    );

    tokio::spawn(seeder.run(seeder_sched_rx));
    tokio::spawn(leecher.run(leecher_sched_rx));
    tokio::spawn(async move { while seeder_events_rx.recv().await.is_some() {} });

    let seeder_peer_id = generate_peer_id();
    let leecher_peer_id = generate_peer_id();
    let (seeder_stream, leecher_stream) = tokio::io::duplex(64 * 1024);

    spawn_peer_side(
        seeder_stream,
        seeder_peer_id,
        info_hash,
        config.clone(),
        seeder_sched_tx.clone(),
        LEECHER_ADDR.parse().unwrap(),
    );
    spawn_peer_side(
        leecher_stream,
        leecher_peer_id,
        info_hash,
        config.clone(),
        leecher_sched_tx.clone(),
        SEEDER_ADDR.parse().unwrap(),
    );

    let seeder_ticker = seeder_sched_tx.clone();
    let leecher_ticker = leecher_sched_tx.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if seeder_ticker.send(SchedulerMessage::Tick).await.is_err() {
                break;
            }
            if leecher_ticker.send(SchedulerMessage::Tick).await.is_err() {
                break;
            }
        }
    });

    let result = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = leecher_events_rx.recv().await {
            if event == SwarmEvent::Complete {
                return;
            }
        }
    })
    .await;

    assert!(result.is_ok(), "leecher never completed the download");
    assert_eq!(leecher_disk.read_piece(0).unwrap(), data[0..4]);
    assert_eq!(leecher_disk.read_piece(1).unwrap(), data[4..8]);
}
