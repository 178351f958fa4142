//! Parsing of `.torrent` files: the `info` dictionary plus the tracker
//! announce URLs and informational fields around it.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;
use swarmcore_bencode::{decode, Mode, Value};
use swarmcore_sha1::Hasher;
use thiserror::Error;

use crate::id20::Id20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Info {
    pub name: String,
    pub piece_length: u32,
    pub pieces: Vec<Id20>,
    pub files: Vec<FileEntry>,
}

impl Info {
    pub fn total_length(&self) -> u64 {
        self.files.iter().map(|f| f.length).sum()
    }

    pub fn is_single_file(&self) -> bool {
        self.files.len() == 1 && self.files[0].path == PathBuf::from(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metainfo {
    pub info: Info,
    pub info_hash: Id20,
    pub announce: Option<String>,
    /// BEP 12 announce tiers; empty if the torrent has no `announce-list`.
    pub announce_list: Vec<Vec<String>>,
    pub comment: Option<String>,
    pub created_by: Option<String>,
}

impl Metainfo {
    pub fn all_trackers(&self) -> Vec<String> {
        if !self.announce_list.is_empty() {
            self.announce_list.iter().flatten().cloned().collect()
        } else {
            self.announce.iter().cloned().collect()
        }
    }
}

#[derive(Debug, Error)]
pub enum MetainfoError {
    #[error("bencode decode error: {0}")]
    Decode(#[from] swarmcore_bencode::DecodeError),
    #[error("top-level value is not a dictionary")]
    NotADict,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("field '{0}' has the wrong type")]
    WrongType(&'static str),
    #[error("'pieces' length {0} is not a multiple of 20")]
    BadPiecesLength(usize),
    #[error("'info' dict must contain exactly one of 'length' or 'files'")]
    AmbiguousFileLayout,
    #[error("file path component is empty")]
    EmptyPathComponent,
    #[error("file path component '{0}' escapes the download root")]
    UnsafePathComponent(String),
}

pub fn parse(buf: &[u8], hasher: &dyn Hasher) -> Result<Metainfo, MetainfoError> {
    let top = decode(buf, Mode::Lenient)?;
    let top = top.as_dict().ok_or(MetainfoError::NotADict)?;

    let info_value = top
        .get(&Bytes::from_static(b"info"))
        .ok_or(MetainfoError::MissingField("info"))?;
    let info_bytes = swarmcore_bencode::encode(info_value);
    let info_hash = Id20::new(hasher.sha1(&info_bytes));

    let info = parse_info(info_value)?;

    let announce = top
        .get(&Bytes::from_static(b"announce"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let announce_list = top
        .get(&Bytes::from_static(b"announce-list"))
        .and_then(Value::as_list)
        .map(|tiers| {
            tiers
                .iter()
                .map(|tier| {
                    tier.as_list()
                        .unwrap_or(&[])
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .collect()
        })
        .unwrap_or_default();

    let comment = top
        .get(&Bytes::from_static(b"comment"))
        .and_then(Value::as_str)
        .map(str::to_owned);
    let created_by = top
        .get(&Bytes::from_static(b"created by"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    Ok(Metainfo {
        info,
        info_hash,
        announce,
        announce_list,
        comment,
        created_by,
    })
}

fn parse_info(value: &Value) -> Result<Info, MetainfoError> {
    let dict = value.as_dict().ok_or(MetainfoError::WrongType("info"))?;

    let name = dict
        .get(&Bytes::from_static(b"name"))
        .and_then(Value::as_str)
        .ok_or(MetainfoError::MissingField("info.name"))?
        .to_owned();

    let piece_length = dict
        .get(&Bytes::from_static(b"piece length"))
        .and_then(Value::as_int)
        .ok_or(MetainfoError::MissingField("info.piece length"))?;
    let piece_length: u32 = piece_length
        .try_into()
        .map_err(|_| MetainfoError::WrongType("info.piece length"))?;

    let pieces_bytes = dict
        .get(&Bytes::from_static(b"pieces"))
        .and_then(Value::as_bytes)
        .ok_or(MetainfoError::MissingField("info.pieces"))?;
    if pieces_bytes.len() % 20 != 0 {
        return Err(MetainfoError::BadPiecesLength(pieces_bytes.len()));
    }
    let pieces = pieces_bytes
        .chunks_exact(20)
        .map(|c| Id20::from_slice(c).expect("chunks_exact(20) guarantees length"))
        .collect();

    let length = dict.get(&Bytes::from_static(b"length")).and_then(Value::as_int);
    let files_list = dict.get(&Bytes::from_static(b"files")).and_then(Value::as_list);

    let files = match (length, files_list) {
        (Some(len), None) => {
            let len: u64 = len.try_into().map_err(|_| MetainfoError::WrongType("info.length"))?;
            vec![FileEntry {
                path: PathBuf::from(&name),
                length: len,
            }]
        }
        (None, Some(list)) => list
            .iter()
            .map(parse_file_entry)
            .collect::<Result<Vec<_>, _>>()?,
        _ => return Err(MetainfoError::AmbiguousFileLayout),
    };

    Ok(Info {
        name,
        piece_length,
        pieces,
        files,
    })
}

fn parse_file_entry(value: &Value) -> Result<FileEntry, MetainfoError> {
    let dict = value.as_dict().ok_or(MetainfoError::WrongType("files[]"))?;
    let length = dict
        .get(&Bytes::from_static(b"length"))
        .and_then(Value::as_int)
        .ok_or(MetainfoError::MissingField("files[].length"))?;
    let length: u64 = length.try_into().map_err(|_| MetainfoError::WrongType("files[].length"))?;
    let path_parts = dict
        .get(&Bytes::from_static(b"path"))
        .and_then(Value::as_list)
        .ok_or(MetainfoError::MissingField("files[].path"))?;
    let mut path = PathBuf::new();
    for part in path_parts {
        let part = part.as_str().ok_or(MetainfoError::WrongType("files[].path[]"))?;
        if part.is_empty() {
            return Err(MetainfoError::EmptyPathComponent);
        }
        // A torrent's file list is relative to a scoped download root; a
        // `..` or absolute-looking segment must never be allowed to walk
        // out of it.
        let component_kind = Path::new(part).components().next();
        if part == ".." || matches!(component_kind, Some(Component::ParentDir | Component::RootDir | Component::Prefix(_)))
        {
            return Err(MetainfoError::UnsafePathComponent(part.to_owned()));
        }
        path.push(part);
    }
    Ok(FileEntry { path, length })
}
