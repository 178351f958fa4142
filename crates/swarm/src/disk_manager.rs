//! Maps `(piece, offset, length)` from piece-space into one or more
//! `(file_id, file_offset, length)` writes/reads against the injected
//! [`Filesystem`], splitting a chunk at file boundaries when a piece
//! straddles more than one file.

use std::path::Path;
use std::sync::Arc;

use swarmcore_core::metainfo::Info;
use swarmcore_core::Lengths;

use crate::filesystem::{resolve_path, DiskError, Filesystem};

/// One file's placement within the torrent-relative (piece-space) byte
/// range, sorted by `start`. This is the interval index: looking up an
/// absolute offset is a binary search over `start`.
#[derive(Debug, Clone)]
struct FileSlot {
    file_id: usize,
    start: u64,
    length: u64,
}

pub struct DiskManager {
    fs: Arc<dyn Filesystem>,
    lengths: Lengths,
    files: Vec<FileSlot>,
}

impl DiskManager {
    pub fn new(fs: Arc<dyn Filesystem>, info: &Info, lengths: Lengths, download_dir: &Path) -> Result<Self, DiskError> {
        let mut files = Vec::with_capacity(info.files.len());
        let mut cursor = 0u64;
        for (file_id, entry) in info.files.iter().enumerate() {
            let path = resolve_path(download_dir, &entry.path)?;
            fs.ensure_file_length(file_id, &path, entry.length)?;
            files.push(FileSlot {
                file_id,
                start: cursor,
                length: entry.length,
            });
            cursor += entry.length;
        }
        Ok(Self { fs, lengths, files })
    }

    pub fn lengths(&self) -> &Lengths {
        &self.lengths
    }

    /// Split `[abs_offset, abs_offset+length)` into the file-local ranges
    /// it touches, in order.
    fn map_range(&self, abs_offset: u64, length: u64) -> Result<Vec<(usize, u64, std::ops::Range<usize>)>, DiskError> {
        let end = abs_offset.checked_add(length).ok_or(DiskError::OutOfBounds)?;
        let mut out = Vec::new();
        let mut pos = abs_offset;
        let start_idx = self
            .files
            .partition_point(|f| f.start + f.length <= abs_offset);
        for slot in &self.files[start_idx..] {
            if pos >= end {
                break;
            }
            let slot_end = slot.start + slot.length;
            if slot_end <= pos {
                continue;
            }
            let chunk_start = pos.max(slot.start);
            let chunk_end = end.min(slot_end);
            if chunk_start >= chunk_end {
                continue;
            }
            let buf_start = (chunk_start - abs_offset) as usize;
            let buf_end = (chunk_end - abs_offset) as usize;
            out.push((slot.file_id, chunk_start - slot.start, buf_start..buf_end));
            pos = chunk_end;
        }
        if pos != end {
            return Err(DiskError::OutOfBounds);
        }
        Ok(out)
    }

    pub fn write_chunk(&self, piece: u32, offset: u32, data: &[u8]) -> Result<(), DiskError> {
        let abs = self.lengths.piece_offset(piece) + offset as u64;
        for (file_id, file_offset, range) in self.map_range(abs, data.len() as u64)? {
            self.fs.write_all(file_id, file_offset, &data[range])?;
        }
        Ok(())
    }

    pub fn read_chunk(&self, piece: u32, offset: u32, length: u32) -> Result<Vec<u8>, DiskError> {
        let abs = self.lengths.piece_offset(piece) + offset as u64;
        let mut out = vec![0u8; length as usize];
        for (file_id, file_offset, range) in self.map_range(abs, length as u64)? {
            self.fs.read_exact(file_id, file_offset, &mut out[range])?;
        }
        Ok(out)
    }

    pub fn read_piece(&self, piece: u32) -> Result<Vec<u8>, DiskError> {
        self.read_chunk(piece, 0, self.lengths.piece_length_for(piece))
    }
}
