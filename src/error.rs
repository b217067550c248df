//! Typed error definitions for the pulsedb engine.
//!
//! One enum covers the whole taxonomy: event validation failures, codec
//! decode failures, structural corruption found by the validator, and
//! lifecycle misuse. All variants implement `std::error::Error` via
//! `thiserror`, so binaries can wrap them in `anyhow::Result` seamlessly.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced by the pulsedb storage engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested database file does not exist or is not a regular file.
    #[error("no such database file")]
    NoFile,

    /// The file was written by a different format version; open it with the
    /// migration-tolerant entry point to read it anyway.
    #[error("file needs migration: {0}")]
    NeedMigration(PathBuf),

    /// Unknown discriminator byte at the start of a row.
    #[error("bad row tag byte {0:#04x}")]
    BadTag(u8),

    /// The byte stream ended in the middle of a record.
    #[error("input truncated mid-record")]
    TruncatedInput,

    /// A variable-length integer ran past its maximum width.
    #[error("malformed varint")]
    BadVarint,

    /// A market-data payload does not carry `2 * depth` quote slots.
    #[error("expected {expected} quote slots, got {got}")]
    DepthMismatch { expected: usize, got: usize },

    /// A trade price is not finite, negative, or too large once scaled.
    #[error("bad trade price")]
    BadPrice,

    /// A volume does not fit its 32-bit field.
    #[error("bad volume")]
    BadVolume,

    /// A bid quote carries an unusable price.
    #[error("bad bid quotes")]
    BadBid,

    /// An ask quote carries an unusable price.
    #[error("bad ask quotes")]
    BadAsk,

    /// Event timestamps must be strictly positive.
    #[error("bad timestamp")]
    BadTimestamp,

    /// The event could not be understood at all (e.g. a malformed tick line
    /// in the recorder import format).
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// The event's timestamp falls outside the calendar day of the file.
    #[error("timestamp {ts} does not belong to this day file")]
    NotThisDay { ts: u64 },

    /// `append` was called through a handle opened for reading.
    #[error("reopen in append mode")]
    ReopenInAppendMode,

    /// A delta row was found where no preceding full snapshot exists.
    #[error("delta row without a preceding full snapshot")]
    OrphanDelta,

    /// A header line or creation parameter is unusable.
    #[error("bad header: {0}")]
    BadHeader(String),

    /// A structural invariant of the file does not hold.
    #[error("corrupt file: {0}")]
    Corrupt(String),

    /// Underlying I/O failure, passed through.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
