//! Structural invariants of a loaded file.
//!
//! Runs after the header and chunk map are in memory, before anything is
//! decoded or appended. Every check failure means the file cannot be
//! trusted; there is no partial acceptance.

use std::path::Path;

use crate::codec::OFFSET_CELL;
use crate::error::{Error, Result};
use crate::header::{Header, CURRENT_VERSION};
use crate::reader::ChunkEntry;

/// File-wide parameter sanity, shared between the validator and file
/// creation.
pub fn check_params(header: &Header) -> Result<()> {
    if header.depth == 0 {
        return Err(Error::BadHeader("depth must be positive".into()));
    }
    if header.scale == 0 {
        return Err(Error::BadHeader("scale must be positive".into()));
    }
    if header.chunk_size == 0 || 86400 % header.chunk_size != 0 {
        return Err(Error::BadHeader(format!(
            "chunk_size {} must divide 86400",
            header.chunk_size
        )));
    }
    Ok(())
}

/// Verify a loaded file state.
///
/// Checks, in order: format version, parameter sanity, chunk-map
/// monotonicity in offset and timestamp, and that each chunk's first
/// timestamp falls inside its bucket window.
pub fn validate(path: &Path, header: &Header, chunks: &[ChunkEntry]) -> Result<()> {
    if header.version != CURRENT_VERSION {
        return Err(Error::NeedMigration(path.to_path_buf()));
    }
    check_params(header)?;

    let map_len = (OFFSET_CELL * header.number_of_chunks()) as u32;
    let day_start = header.day_start_ms();
    let span = header.chunk_span_ms();

    let mut prev: Option<&ChunkEntry> = None;
    for entry in chunks {
        if entry.offset < map_len {
            return Err(Error::Corrupt(format!(
                "chunk {} offset {} points inside the chunk map",
                entry.bucket, entry.offset
            )));
        }
        if let Some(p) = prev {
            if entry.offset <= p.offset {
                return Err(Error::Corrupt(format!(
                    "chunk offsets not increasing at bucket {}",
                    entry.bucket
                )));
            }
            if entry.first_ts <= p.first_ts {
                return Err(Error::Corrupt(format!(
                    "chunk timestamps not increasing at bucket {}",
                    entry.bucket
                )));
            }
        }
        let lo = day_start + entry.bucket as u64 * span;
        let hi = lo + span;
        if entry.first_ts < lo || entry.first_ts >= hi {
            return Err(Error::Corrupt(format!(
                "chunk {} first timestamp {} outside its bucket window",
                entry.bucket, entry.first_ts
            )));
        }
        prev = Some(entry);
    }
    Ok(())
}
