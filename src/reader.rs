//! Read-only access to a day file.
//!
//! `Reader::open` parses the header, lifts the candle slot and chunk map
//! into memory, peeks the first timestamp of every occupied bucket, runs the
//! structural validator, and buffers everything from the chunk map to EOF.
//! The file handle is released before `open` returns; iterators only ever
//! touch the in-memory buffer, so any number of them can coexist over one
//! `Reader` and the file can be rotated away underneath.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

use crate::codec::{self, Peeked, CANDLE_SLOT, OFFSET_CELL};
use crate::error::{Error, Result};
use crate::event::Candle;
use crate::header::{Header, CURRENT_VERSION};
use crate::validate;

/// One occupied bucket: its number, the timestamp of its first row, and the
/// row's offset relative to the chunk-map start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    pub bucket: usize,
    pub first_ts: u64,
    pub offset: u32,
}

/// Which buckets of the day hold data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Presence {
    pub number_of_chunks: usize,
    pub occupied: Vec<usize>,
}

/// Header fields plus the presence view, for callers that want to know what
/// a file holds without decoding rows.
#[derive(Debug, Clone)]
pub struct FileInfo {
    pub path: PathBuf,
    pub stock: String,
    pub date: time::Date,
    pub version: u32,
    pub depth: usize,
    pub scale: u32,
    pub chunk_size: u32,
    pub have_candle: bool,
    pub presence: Presence,
    pub candle: Option<Candle>,
}

/// A fully loaded, immutable view of one day file.
#[derive(Debug)]
pub struct Reader {
    path: PathBuf,
    header: Header,
    candle: Option<Candle>,
    chunks: Vec<ChunkEntry>,
    /// Absolute file offset of the chunk-map start.
    chunk_map_offset: u64,
    /// File bytes from the chunk-map start to EOF; chunk offsets index
    /// directly into this buffer.
    buf: Vec<u8>,
}

impl Reader {
    /// Open and validate. A file written by another format version is
    /// refused with `NeedMigration`.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_inner(path, false)
    }

    /// Migration-tolerant open: a version mismatch is accepted and the
    /// structural validator is skipped, as the caller asked to read a file
    /// this engine did not write.
    pub fn open_migrate(path: &Path) -> Result<Self> {
        Self::open_inner(path, true)
    }

    fn open_inner(path: &Path, tolerate_version: bool) -> Result<Self> {
        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(Error::NoFile),
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(Error::NoFile);
        }

        let bytes = std::fs::read(path)?;
        let (header, mut off) = Header::parse(&bytes)?;

        let candle = if header.have_candle {
            let slot = bytes
                .get(off..off + CANDLE_SLOT)
                .ok_or(Error::TruncatedInput)?;
            off += CANDLE_SLOT;
            codec::decode_candle(slot)
        } else {
            None
        };

        let chunk_map_offset = off as u64;
        let buf = bytes[off..].to_vec();
        let map_len = OFFSET_CELL * header.number_of_chunks();
        if buf.len() < map_len {
            return Err(Error::TruncatedInput);
        }

        let mut chunks = Vec::new();
        for bucket in 0..header.number_of_chunks() {
            let cell = codec::decode_offset_cell(&buf[OFFSET_CELL * bucket..]);
            if cell == 0 {
                continue;
            }
            let offset = cell as usize;
            if offset < map_len || offset >= buf.len() {
                return Err(Error::Corrupt(format!(
                    "chunk {bucket} offset {cell} points outside the row stream"
                )));
            }
            let first_ts = match codec::peek_timestamp(&buf[offset..])? {
                Peeked::Absolute(ts) => ts,
                // every chunk must begin with a self-contained row
                Peeked::Relative(_) => return Err(Error::OrphanDelta),
            };
            chunks.push(ChunkEntry { bucket, first_ts, offset: cell });
        }

        if header.version != CURRENT_VERSION {
            if !tolerate_version {
                return Err(Error::NeedMigration(path.to_path_buf()));
            }
            warn!(
                path = %path.display(),
                version = header.version,
                "opening foreign-version file, validator skipped"
            );
        } else {
            validate::validate(path, &header, &chunks)?;
        }

        Ok(Reader {
            path: path.to_path_buf(),
            header,
            candle,
            chunks,
            chunk_map_offset,
            buf,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn candle(&self) -> Option<Candle> {
        self.candle
    }

    pub fn chunks(&self) -> &[ChunkEntry] {
        &self.chunks
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Absolute file offset where the chunk map begins.
    pub(crate) fn chunk_map_offset(&self) -> u64 {
        self.chunk_map_offset
    }

    /// Chunk map plus row stream; chunk offsets index into this slice.
    pub(crate) fn buf(&self) -> &[u8] {
        &self.buf
    }

    /// Offset of the first row within the buffer, just past the chunk map.
    pub fn data_start(&self) -> usize {
        OFFSET_CELL * self.header.number_of_chunks()
    }

    pub fn file_info(&self) -> FileInfo {
        FileInfo {
            path: self.path.clone(),
            stock: self.header.stock.clone(),
            date: self.header.date,
            version: self.header.version,
            depth: self.header.depth,
            scale: self.header.scale,
            chunk_size: self.header.chunk_size,
            have_candle: self.header.have_candle,
            presence: Presence {
                number_of_chunks: self.header.number_of_chunks(),
                occupied: self.chunks.iter().map(|c| c.bucket).collect(),
            },
            candle: self.candle,
        }
    }
}
