//! The writable side of a day file.
//!
//! An `Appender` exclusively owns its file handle and the running state the
//! delta encoder needs: the last snapshot, the candle, the in-memory chunk
//! map, and the wall-clock mark where the next bucket begins. The append
//! state machine:
//!
//! - first event of a bucket is always written self-contained (full md or
//!   trade), its offset goes into the chunk-map slot, and the delta basis is
//!   reset so every chunk can be decoded without prior context
//! - market data inside a bucket is delta-encoded against the last snapshot,
//!   or written full when no basis exists yet
//! - trades update the running candle; the candle slot is persisted at every
//!   bucket start and at close
//!
//! Reopening an existing file replays the last chunk to rebuild the running
//! state; a partial trailing row left by a crash is truncated away before
//! appending resumes.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use time::Date;
use tracing::{debug, info, warn};

use crate::codec::{self, Row, CANDLE_SLOT, OFFSET_CELL};
use crate::error::{Error, Result};
use crate::event::{Candle, Event, ScaledMd};
use crate::fs::FileKind;
use crate::header::{Header, CURRENT_VERSION};
use crate::reader::{ChunkEntry, Reader};
use crate::validate;

/// Creation-time options for `open_append`. Options other than `nosync` are
/// ignored when the file already exists; the header on disk wins.
#[derive(Debug, Clone)]
pub struct AppendOptions {
    pub stock: String,
    pub date: Date,
    /// File-naming variant used by the filesystem collaborator.
    pub kind: FileKind,
    /// Disable fsync on bucket-boundary writes.
    pub nosync: bool,
    pub have_candle: bool,
    pub depth: usize,
    pub scale: u32,
    /// Bucket duration in seconds.
    pub chunk_size: u32,
}

impl AppendOptions {
    pub fn new(stock: impl Into<String>, date: Date) -> Self {
        AppendOptions {
            stock: stock.into(),
            date,
            kind: FileKind::Stock,
            nosync: false,
            have_candle: true,
            depth: 1,
            scale: 100,
            chunk_size: 300,
        }
    }
}

pub struct Appender {
    file: File,
    path: PathBuf,
    header: Header,
    /// Absolute offset of the candle slot; meaningless without `have_candle`.
    candle_offset: u64,
    /// Absolute offset of the chunk-map start; cell offsets are relative to
    /// this position.
    chunk_map_offset: u64,
    chunks: Vec<ChunkEntry>,
    last_md: Option<ScaledMd>,
    last_timestamp: u64,
    /// Wall-clock ms at which the next bucket begins; `None` until the first
    /// event opens a chunk.
    next_chunk_time: Option<u64>,
    candle: Option<Candle>,
    sync: bool,
}

impl Appender {
    /// Open for appending: create a fresh file, or pick up an existing one
    /// where it left off.
    pub fn open(path: &Path, opts: &AppendOptions) -> Result<Self> {
        if path.exists() {
            Self::open_existing(path, opts.nosync)
        } else {
            Self::create(path, opts)
        }
    }

    fn create(path: &Path, opts: &AppendOptions) -> Result<Self> {
        let header = Header {
            version: CURRENT_VERSION,
            stock: opts.stock.clone(),
            date: opts.date,
            depth: opts.depth,
            scale: opts.scale,
            chunk_size: opts.chunk_size,
            have_candle: opts.have_candle,
            extra: vec![],
        };
        validate::check_params(&header)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        file.write_all(header.format().as_bytes())?;
        let candle_offset = file.stream_position()?;
        if header.have_candle {
            file.write_all(&[0u8; CANDLE_SLOT])?;
        }
        let chunk_map_offset = file.stream_position()?;
        file.write_all(&vec![0u8; OFFSET_CELL * header.number_of_chunks()])?;

        info!(
            path = %path.display(),
            stock = %header.stock,
            depth = header.depth,
            chunk_size = header.chunk_size,
            "created day file"
        );
        Ok(Appender {
            file,
            path: path.to_path_buf(),
            header,
            candle_offset,
            chunk_map_offset,
            chunks: Vec::new(),
            last_md: None,
            last_timestamp: 0,
            next_chunk_time: None,
            candle: None,
            sync: !opts.nosync,
        })
    }

    fn open_existing(path: &Path, nosync: bool) -> Result<Self> {
        let reader = Reader::open(path)?;
        let header = reader.header().clone();
        let chunk_map_offset = reader.chunk_map_offset();
        let candle_offset = if header.have_candle {
            chunk_map_offset - CANDLE_SLOT as u64
        } else {
            chunk_map_offset
        };
        let buf = reader.buf();
        let depth = header.depth;

        // Replay the last chunk: its head is self-contained, so decoding
        // from there rebuilds the delta basis and the last timestamp.
        let (mut pos, next_chunk_time) = match reader.chunks().last() {
            Some(last) => (
                last.offset as usize,
                Some(header.day_start_ms() + (last.bucket as u64 + 1) * header.chunk_span_ms()),
            ),
            None => (reader.data_start(), None),
        };
        let mut last_md: Option<ScaledMd> = None;
        let mut last_timestamp = 0u64;
        let mut truncate_to: Option<u64> = None;
        while pos < buf.len() {
            let row_start = pos;
            match codec::decode_row(buf, &mut pos, depth) {
                Ok(Row::Full { ts, slots }) => {
                    last_timestamp = ts;
                    last_md = Some(ScaledMd { ts, slots });
                }
                Ok(Row::Delta { ts_delta, changes }) => {
                    let prev = last_md.as_ref().ok_or(Error::OrphanDelta)?;
                    let md = ScaledMd::apply_delta(prev, ts_delta, &changes)?;
                    last_timestamp = md.ts;
                    last_md = Some(md);
                }
                Ok(Row::Trade { ts, .. }) => last_timestamp = ts,
                Err(Error::TruncatedInput) => {
                    truncate_to = Some(chunk_map_offset + row_start as u64);
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let file = OpenOptions::new().read(true).write(true).open(path)?;
        if let Some(len) = truncate_to {
            warn!(
                path = %path.display(),
                dropped = buf.len() as u64 - (len - chunk_map_offset),
                "truncating partial trailing row"
            );
            file.set_len(len)?;
        }

        info!(
            path = %path.display(),
            chunks = reader.chunks().len(),
            last_timestamp,
            "reopened day file for append"
        );
        Ok(Appender {
            file,
            path: path.to_path_buf(),
            header,
            candle_offset,
            chunk_map_offset,
            chunks: reader.chunks().to_vec(),
            last_md,
            last_timestamp,
            next_chunk_time,
            candle: reader.candle(),
            sync: !nosync,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn candle(&self) -> Option<Candle> {
        self.candle
    }

    /// Append one event. Validation failures leave the file and the running
    /// state untouched.
    pub fn append(&mut self, event: &Event) -> Result<()> {
        let header = &self.header;
        event.validate(header.scale)?;
        let ts = event.timestamp();

        let boundary = match self.next_chunk_time {
            None => true,
            Some(t) => ts >= t,
        };
        if boundary {
            self.append_boundary(event, ts)?;
        } else {
            match event {
                Event::MarketData(md) => {
                    let scaled = ScaledMd::from_md(md, header.depth, header.scale)?;
                    let mut buf = Vec::new();
                    match &self.last_md {
                        None => {
                            codec::encode_full_md(&mut buf, scaled.ts, &scaled.slots, header.depth)?
                        }
                        Some(prev) => {
                            let (ts_delta, changes) = scaled.delta_from(prev);
                            codec::encode_delta_md(&mut buf, ts_delta, &changes, header.depth)?
                        }
                    }
                    self.write_row(&buf)?;
                    self.last_md = Some(scaled);
                }
                Event::Trade(t) => {
                    let price = crate::event::scale_price(t.price, header.scale)
                        .ok_or(Error::BadPrice)?;
                    let mut buf = Vec::new();
                    codec::encode_trade(&mut buf, ts, price, t.volume);
                    self.write_row(&buf)?;
                    self.update_candle(price);
                }
            }
        }

        if ts < self.last_timestamp {
            warn!(ts, last = self.last_timestamp, "timestamp went backwards");
        }
        self.last_timestamp = ts;
        Ok(())
    }

    /// First event of a bucket: refuse out-of-day timestamps before any byte
    /// is written, then write a self-contained row, index it, and persist
    /// the candle.
    fn append_boundary(&mut self, event: &Event, ts: u64) -> Result<()> {
        let header = &self.header;
        let bucket = header.bucket_of(ts).ok_or(Error::NotThisDay { ts })?;

        let mut buf = Vec::new();
        let mut trade_price = None;
        let scaled = match event {
            Event::MarketData(md) => {
                let scaled = ScaledMd::from_md(md, header.depth, header.scale)?;
                codec::encode_full_md(&mut buf, scaled.ts, &scaled.slots, header.depth)?;
                Some(scaled)
            }
            Event::Trade(t) => {
                let price =
                    crate::event::scale_price(t.price, header.scale).ok_or(Error::BadPrice)?;
                codec::encode_trade(&mut buf, ts, price, t.volume);
                trade_price = Some(price);
                None
            }
        };

        let eof = self.write_row(&buf)?;
        let rel = u32::try_from(eof - self.chunk_map_offset)
            .map_err(|_| Error::Corrupt("row stream exceeds 32-bit offset space".into()))?;
        self.file
            .seek(SeekFrom::Start(self.chunk_map_offset + (OFFSET_CELL * bucket) as u64))?;
        self.file.write_all(&codec::encode_offset_cell(rel))?;

        self.chunks.push(ChunkEntry { bucket, first_ts: ts, offset: rel });
        self.next_chunk_time =
            Some(self.header.day_start_ms() + (bucket as u64 + 1) * self.header.chunk_span_ms());
        debug!(bucket, offset = rel, "opened chunk");

        // a chunk must be decodable on its own, so the delta basis resets
        self.last_md = scaled;
        if let Some(price) = trade_price {
            self.update_candle(price);
        }
        if self.header.have_candle {
            self.write_candle()?;
        }
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Seek to EOF and write one encoded row; returns the row's absolute
    /// starting offset.
    fn write_row(&mut self, buf: &[u8]) -> Result<u64> {
        let eof = self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(buf)?;
        Ok(eof)
    }

    fn update_candle(&mut self, price: u32) {
        match &mut self.candle {
            Some(c) => c.update(price),
            None => self.candle = Some(Candle::from_trade(price)),
        }
    }

    fn write_candle(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.candle_offset))?;
        self.file
            .write_all(&codec::encode_candle(self.candle.as_ref()))?;
        Ok(())
    }

    /// Persist the candle and release the handle.
    pub fn close(mut self) -> Result<()> {
        if self.header.have_candle {
            self.write_candle()?;
        }
        self.file.sync_data()?;
        info!(path = %self.path.display(), last_timestamp = self.last_timestamp, "closed day file");
        Ok(())
    }
}
