//! BEP 3 HTTP(S) tracker announce, with BEP 23 compact peer lists.

use std::time::Duration;

use bytes::Bytes;
use swarmcore_bencode::{decode, Mode, Value};
use swarmcore_core::peer::parse_compact_peers;
use tracing::{debug, trace};
use url::Url;

use crate::error::TrackerError;
use crate::{AnnounceEvent, AnnounceRequest, AnnounceResponse};

fn event_param(event: AnnounceEvent) -> Option<&'static str> {
    match event {
        AnnounceEvent::None => None,
        AnnounceEvent::Started => Some("started"),
        AnnounceEvent::Completed => Some("completed"),
        AnnounceEvent::Stopped => Some("stopped"),
    }
}

pub async fn announce(
    url: &Url,
    request: &AnnounceRequest,
) -> Result<AnnounceResponse, TrackerError> {
    // `info_hash` and `peer_id` are 20 arbitrary bytes, not valid UTF-8 in
    // general, so they can't go through `Url::query_pairs_mut` (which
    // percent-encodes a `&str`). Everything else is a plain ASCII number,
    // so it's appended the normal way and the two binary fields are spliced
    // into the resulting query string by hand.
    let mut url = url.clone();
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("port", &request.port.to_string());
        q.append_pair("uploaded", &request.uploaded.to_string());
        q.append_pair("downloaded", &request.downloaded.to_string());
        q.append_pair("left", &request.left.to_string());
        q.append_pair("compact", "1");
        if let Some(event) = event_param(request.event) {
            q.append_pair("event", event);
        }
        q.append_pair("key", &request.key.to_string());
    }
    let extra = format!(
        "info_hash={}&peer_id={}",
        percent_encode_bytes(request.info_hash.as_bytes()),
        percent_encode_bytes(request.peer_id.as_bytes()),
    );
    let query = match url.query() {
        Some(existing) => format!("{extra}&{existing}"),
        None => extra,
    };
    url.set_query(Some(&query));

    trace!(url = %url, "sending HTTP tracker announce");
    let body = reqwest::get(url).await?.bytes().await?;
    parse_announce_response(&body)
}

fn percent_encode_bytes(bytes: &[u8]) -> String {
    use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
    percent_encode(bytes, NON_ALPHANUMERIC).to_string()
}

fn parse_announce_response(body: &[u8]) -> Result<AnnounceResponse, TrackerError> {
    let value = decode(body, Mode::Lenient)?;
    let dict = value.as_dict().ok_or(TrackerError::NotADict)?;

    if let Some(reason) = dict.get(&Bytes::from_static(b"failure reason")).and_then(Value::as_str) {
        return Err(TrackerError::Failure(reason.to_owned()));
    }

    let interval = dict
        .get(&Bytes::from_static(b"interval"))
        .and_then(Value::as_int)
        .ok_or(TrackerError::MissingField("interval"))?;
    let leechers = dict
        .get(&Bytes::from_static(b"incomplete"))
        .and_then(Value::as_int)
        .map(|v| v as u32);
    let seeders = dict
        .get(&Bytes::from_static(b"complete"))
        .and_then(Value::as_int)
        .map(|v| v as u32);

    let peers_value = dict
        .get(&Bytes::from_static(b"peers"))
        .ok_or(TrackerError::MissingField("peers"))?;
    let peers = match peers_value {
        Value::Bytes(compact) => parse_compact_peers(compact)?,
        Value::List(list) => list
            .iter()
            .filter_map(|entry| {
                let dict = entry.as_dict()?;
                let ip = dict.get(&Bytes::from_static(b"ip")).and_then(Value::as_str)?;
                let port = dict.get(&Bytes::from_static(b"port")).and_then(Value::as_int)?;
                format!("{ip}:{port}").parse().ok()
            })
            .collect(),
        _ => return Err(TrackerError::MissingField("peers")),
    };

    debug!(peers = peers.len(), interval, "parsed tracker announce reply");

    Ok(AnnounceResponse {
        interval: Duration::from_secs(interval.max(0) as u64),
        leechers,
        seeders,
        peers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compact_peer_reply() {
        // d8:intervali1800e5:peers6:\x01\x02\x03\x04\x1f\x90e
        let body = swarmcore_bencode::encode(&swarmcore_bencode::dict([
            ("interval", Value::Int(1800)),
            ("peers", Value::Bytes(Bytes::from_static(&[1, 2, 3, 4, 0x1f, 0x90]))),
        ]));
        let resp = parse_announce_response(&body).unwrap();
        assert_eq!(resp.interval, Duration::from_secs(1800));
        assert_eq!(resp.peers.len(), 1);
        assert_eq!(resp.peers[0].to_string(), "1.2.3.4:8080");
    }

    #[test]
    fn parses_non_compact_dict_peer_list() {
        let peer = swarmcore_bencode::dict([
            ("ip", Value::Bytes(Bytes::from_static(b"5.6.7.8"))),
            ("port", Value::Int(6881)),
        ]);
        let body = swarmcore_bencode::encode(&swarmcore_bencode::dict([
            ("interval", Value::Int(900)),
            ("peers", Value::List(vec![peer])),
        ]));
        let resp = parse_announce_response(&body).unwrap();
        assert_eq!(resp.peers.len(), 1);
        assert_eq!(resp.peers[0].to_string(), "5.6.7.8:6881");
    }

    #[test]
    fn surfaces_failure_reason() {
        let body = swarmcore_bencode::encode(&swarmcore_bencode::dict([(
            "failure reason",
            Value::Bytes(Bytes::from_static(b"banned")),
        )]));
        assert!(matches!(parse_announce_response(&body), Err(TrackerError::Failure(_))));
    }
}
