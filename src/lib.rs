//! Append-only, time-partitioned storage for financial tick data.
//!
//! One file holds one (stock, date) pair. Each file is self-describing
//! (textual header), self-indexed (a sparse chunk map over fixed-width time
//! buckets), and delta-compressed (market-data rows encode differences
//! against the previous snapshot). This crate provides:
//!
//! - `event`: the domain model — depth quotes, trades, candles, scaling
//! - `codec`: the bit-exact row, chunk-cell, and candle-slot encoding
//! - `appender`: the append state machine and crash recovery
//! - `reader` + `iter`: random-access open and the decoding cursor with
//!   range seeks and predicate filters
//! - `db`: the narrow façade the binaries go through
//! - `fs` / `config`: thin collaborators for paths and configuration
//!
//! The binaries in this repository (`src/main.rs` and `src/bin/player.rs`)
//! use these modules to import tick streams into day files and to play the
//! files back.

pub mod appender;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod fs;
pub mod header;
pub mod iter;
pub mod reader;
pub mod validate;

pub use appender::{AppendOptions, Appender};
pub use db::Db;
pub use error::{Error, Result};
pub use event::{Candle, Event, MarketData, Quote, Trade};
pub use header::{Header, CURRENT_VERSION};
pub use iter::EventIterator;
pub use reader::{FileInfo, Presence, Reader};
