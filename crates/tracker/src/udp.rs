//! BEP 15 UDP tracker protocol: a connect handshake establishes a
//! connection id, which is then spent on an announce request.

use std::time::Duration;

use byteorder::{ByteOrder, BE};
use rand::Rng;
use swarmcore_core::peer::parse_compact_peers;
use tokio::net::UdpSocket;
use tracing::trace;
use url::Url;

use crate::error::TrackerError;
use crate::{AnnounceEvent, AnnounceRequest, AnnounceResponse};

const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const CONNECTION_ID_MAGIC: u64 = 0x41727101980;

const EVENT_NONE: u32 = 0;
const EVENT_COMPLETED: u32 = 1;
const EVENT_STARTED: u32 = 2;
const EVENT_STOPPED: u32 = 3;

fn event_code(event: AnnounceEvent) -> u32 {
    match event {
        AnnounceEvent::None => EVENT_NONE,
        AnnounceEvent::Started => EVENT_STARTED,
        AnnounceEvent::Completed => EVENT_COMPLETED,
        AnnounceEvent::Stopped => EVENT_STOPPED,
    }
}

fn new_transaction_id() -> u32 {
    rand::thread_rng().gen()
}

fn serialize_connect(transaction_id: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    buf.extend_from_slice(&CONNECTION_ID_MAGIC.to_be_bytes());
    buf.extend_from_slice(&ACTION_CONNECT.to_be_bytes());
    buf.extend_from_slice(&transaction_id.to_be_bytes());
    buf
}

fn serialize_announce(connection_id: u64, transaction_id: u32, request: &AnnounceRequest) -> Vec<u8> {
    let mut buf = Vec::with_capacity(98);
    buf.extend_from_slice(&connection_id.to_be_bytes());
    buf.extend_from_slice(&ACTION_ANNOUNCE.to_be_bytes());
    buf.extend_from_slice(&transaction_id.to_be_bytes());
    buf.extend_from_slice(request.info_hash.as_bytes());
    buf.extend_from_slice(request.peer_id.as_bytes());
    buf.extend_from_slice(&request.downloaded.to_be_bytes());
    buf.extend_from_slice(&request.left.to_be_bytes());
    buf.extend_from_slice(&request.uploaded.to_be_bytes());
    buf.extend_from_slice(&event_code(request.event).to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes()); // ip: let the tracker infer it
    buf.extend_from_slice(&request.key.to_be_bytes());
    buf.extend_from_slice(&(-1i32).to_be_bytes()); // num_want: default
    buf.extend_from_slice(&request.port.to_be_bytes());
    buf
}

fn parse_connect_response(buf: &[u8]) -> Result<(u32, u64), TrackerError> {
    if buf.len() < 16 {
        return Err(TrackerError::UdpResponseTooShort);
    }
    let action = BE::read_u32(&buf[0..4]);
    let transaction_id = BE::read_u32(&buf[4..8]);
    if action != ACTION_CONNECT {
        return Err(TrackerError::UnexpectedAction(action));
    }
    let connection_id = BE::read_u64(&buf[8..16]);
    Ok((transaction_id, connection_id))
}

fn parse_announce_response(buf: &[u8]) -> Result<(u32, AnnounceResponse), TrackerError> {
    if buf.len() < 20 {
        return Err(TrackerError::UdpResponseTooShort);
    }
    let action = BE::read_u32(&buf[0..4]);
    let transaction_id = BE::read_u32(&buf[4..8]);
    if action != ACTION_ANNOUNCE {
        return Err(TrackerError::UnexpectedAction(action));
    }
    let interval = BE::read_u32(&buf[8..12]);
    let leechers = BE::read_u32(&buf[12..16]);
    let seeders = BE::read_u32(&buf[16..20]);
    let peers = parse_compact_peers(&buf[20..])?;
    Ok((
        transaction_id,
        AnnounceResponse {
            interval: Duration::from_secs(interval as u64),
            leechers: Some(leechers),
            seeders: Some(seeders),
            peers,
        },
    ))
}

/// One-shot announce: connect, then announce, over a freshly bound socket.
/// Long-lived sessions that re-announce periodically should instead keep a
/// socket and connection id around and call [`announce_with_connection`]
/// directly, since a connection id is valid for two minutes (BEP 15).
pub async fn announce(url: &Url, request: &AnnounceRequest) -> Result<AnnounceResponse, TrackerError> {
    let host = url.host_str().ok_or(TrackerError::UnsupportedScheme(url.to_string()))?;
    let port = url.port().unwrap_or(80);
    let sock = UdpSocket::bind("0.0.0.0:0").await?;
    sock.connect((host, port)).await?;

    let connection_id = connect(&sock).await?;
    announce_with_connection(&sock, connection_id, request).await
}

async fn connect(sock: &UdpSocket) -> Result<u64, TrackerError> {
    let tid = new_transaction_id();
    sock.send(&serialize_connect(tid)).await?;
    let mut buf = [0u8; 4096];
    let n = sock.recv(&mut buf).await?;
    let (rtid, connection_id) = parse_connect_response(&buf[..n])?;
    if rtid != tid {
        return Err(TrackerError::TransactionIdMismatch);
    }
    trace!(connection_id, "udp tracker connected");
    Ok(connection_id)
}

pub async fn announce_with_connection(
    sock: &UdpSocket,
    connection_id: u64,
    request: &AnnounceRequest,
) -> Result<AnnounceResponse, TrackerError> {
    let tid = new_transaction_id();
    sock.send(&serialize_announce(connection_id, tid, request)).await?;
    let mut buf = [0u8; 4096];
    let n = sock.recv(&mut buf).await?;
    let (rtid, response) = parse_announce_response(&buf[..n])?;
    if rtid != tid {
        return Err(TrackerError::TransactionIdMismatch);
    }
    Ok(response)
}
