use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use swarmcore_core::magnet::Magnet;
use swarmcore_core::metainfo::{self, Metainfo};
use swarmcore_core::SwarmConfig;
use swarmcore_sha1::RealHasher;
use swarmcore_swarm::{
    clock::RealClock,
    events::SwarmEvent,
    filesystem::RealFilesystem,
    socket::TcpSocketFactory,
    swarm::Swarm,
};
use tracing::{error, info};

/// A BitTorrent client driven by a `.torrent` file or a magnet link.
#[derive(Parser)]
#[command(name = "swarmcore", version, about)]
struct Opts {
    /// Path to a `.torrent` file, or a `magnet:?xt=urn:btih:...` URI.
    source: String,

    /// Directory to download files into.
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// TCP port to listen on for incoming peer connections.
    #[arg(short = 'p', long, env = "SWARMCORE_LISTEN_PORT", default_value_t = 6881)]
    listen_port: u16,

    /// Maximum number of simultaneously connected peers.
    #[arg(long, env = "SWARMCORE_MAX_PEERS")]
    max_peers: Option<usize>,

    /// Log verbosity, e.g. "info", "debug", "swarmcore_swarm=trace".
    #[arg(long, env = "SWARMCORE_LOG", default_value = "info")]
    log_filter: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&opts.log_filter))
        .init();

    let metainfo = load_metainfo(&opts.source).await?;
    info!(name = %metainfo.info.name, pieces = metainfo.info.pieces.len(), "loaded torrent");

    let mut config = SwarmConfig::default();
    if let Some(max_peers) = opts.max_peers {
        config.max_peers = max_peers;
    }

    std::fs::create_dir_all(&opts.output_dir).context("creating output directory")?;

    let fs = Arc::new(RealFilesystem::new());
    let clock = Arc::new(RealClock);
    let sockets = Arc::new(
        TcpSocketFactory::bind(format!("0.0.0.0:{}", opts.listen_port).parse()?)
            .await
            .context("binding listen socket")?,
    );

    let swarm = Swarm::new(metainfo, opts.listen_port, config);
    let mut handle = swarm.start(fs, Arc::new(RealHasher), clock, sockets, &opts.output_dir)?;

    while let Some(event) = handle.events.recv().await {
        match event {
            SwarmEvent::Progress { have_pieces, total_pieces, download_rate, upload_rate } => {
                info!(
                    have_pieces,
                    total_pieces,
                    download_kib_s = download_rate / 1024.0,
                    upload_kib_s = upload_rate / 1024.0,
                    "progress"
                );
            }
            SwarmEvent::PieceVerified { piece } => info!(piece, "piece verified"),
            SwarmEvent::PieceHashMismatch { piece } => error!(piece, "piece failed hash check"),
            SwarmEvent::Connected { peer } => info!(%peer, "peer connected"),
            SwarmEvent::Disconnected { peer } => info!(%peer, "peer disconnected"),
            SwarmEvent::NonFatalError { message } => error!(message, "non-fatal error"),
            SwarmEvent::Fatal { message } => {
                error!(message, "fatal error, stopping");
                break;
            }
            SwarmEvent::Complete => {
                info!("torrent complete");
                break;
            }
        }
    }

    Ok(())
}

async fn load_metainfo(source: &str) -> anyhow::Result<Metainfo> {
    if let Ok(magnet) = Magnet::parse(source) {
        return metainfo_from_magnet(magnet).await;
    }

    let bytes = if source.starts_with("http://") || source.starts_with("https://") {
        reqwest::get(source)
            .await
            .with_context(|| format!("fetching torrent from {source}"))?
            .bytes()
            .await
            .with_context(|| format!("reading torrent body from {source}"))?
            .to_vec()
    } else if source == "-" {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf).context("reading torrent from stdin")?;
        buf
    } else {
        std::fs::read(source).with_context(|| format!("reading torrent file {source}"))?
    };

    metainfo::parse(&bytes, &RealHasher).with_context(|| format!("parsing torrent file {source}"))
}

/// Magnet links carry no piece metadata of their own; fetching it requires
/// the ut_metadata extension over a live peer connection, which is out of
/// scope here. Surfacing a clear error beats silently hanging.
async fn metainfo_from_magnet(_magnet: Magnet) -> anyhow::Result<Metainfo> {
    anyhow::bail!(
        "magnet links require fetching metadata (BEP 9) from a connected peer, which swarmcore doesn't implement yet; pass a .torrent file instead"
    )
}
