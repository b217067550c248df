//! Domain events and the arithmetic that keeps them storable.
//!
//! This module defines the in-memory shape of everything the engine writes
//! and reads back:
//! - `Event`: tagged union of market-depth snapshots and trades
//! - depth normalization (`set_depth`): every stored snapshot carries exactly
//!   `depth` levels per side, padded with `(0, 0)` or truncated
//! - price scaling: prices live on disk as `round(price * scale)` integers
//! - `Candle`: running O/H/L/C over scaled trade prices
//!
//! Prices are quantized before they ever reach the codec, so the delta
//! encoder works on exact integers and never accumulates float drift.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One price level: price in natural units, integral volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub price: f64,
    pub volume: u32,
}

/// Market-depth snapshot at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Bid side, best price at index 0.
    pub bid: Vec<Quote>,
    /// Ask side, best price at index 0.
    pub ask: Vec<Quote>,
}

/// A single execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: u64,
    pub price: f64,
    pub volume: u32,
}

/// Everything a day file stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    MarketData(MarketData),
    Trade(Trade),
}

impl Event {
    pub fn timestamp(&self) -> u64 {
        match self {
            Event::MarketData(md) => md.timestamp,
            Event::Trade(t) => t.timestamp,
        }
    }

    /// Check the event against the file-wide `scale` before it is encoded.
    ///
    /// Failures leave no trace in the file: validation runs before any byte
    /// is written.
    pub fn validate(&self, scale: u32) -> Result<()> {
        if self.timestamp() == 0 {
            return Err(Error::BadTimestamp);
        }
        match self {
            Event::Trade(t) => {
                scale_price(t.price, scale).ok_or(Error::BadPrice)?;
            }
            Event::MarketData(md) => {
                for q in &md.bid {
                    scale_price(q.price, scale).ok_or(Error::BadBid)?;
                }
                for q in &md.ask {
                    scale_price(q.price, scale).ok_or(Error::BadAsk)?;
                }
            }
        }
        Ok(())
    }
}

/// Scale a price to its on-disk integer form.
///
/// Returns `None` for prices that cannot be stored: non-finite, negative, or
/// larger than 31 bits once scaled (the candle slot keeps the open price in
/// 31 bits, so the same ceiling applies everywhere).
pub fn scale_price(price: f64, scale: u32) -> Option<u32> {
    if !price.is_finite() || price < 0.0 {
        return None;
    }
    let scaled = (price * f64::from(scale)).round();
    if scaled > f64::from(i32::MAX) {
        return None;
    }
    Some(scaled as u32)
}

pub fn unscale_price(scaled: u32, scale: u32) -> f64 {
    f64::from(scaled) / f64::from(scale)
}

/// Normalize one side to exactly `depth` levels: pad with `(0, 0)`, truncate
/// the tail. `depth = 0` yields the empty side.
pub fn set_depth(quotes: &[Quote], depth: usize) -> Vec<Quote> {
    let mut out: Vec<Quote> = quotes.iter().take(depth).copied().collect();
    while out.len() < depth {
        out.push(Quote { price: 0.0, volume: 0 });
    }
    out
}

fn scale_side(
    quotes: &[Quote],
    depth: usize,
    scale: u32,
    err: fn() -> Error,
) -> Result<Vec<(u32, u32)>> {
    set_depth(quotes, depth)
        .iter()
        .map(|q| Ok((scale_price(q.price, scale).ok_or_else(err)?, q.volume)))
        .collect()
}

/// A depth-normalized snapshot in scaled-integer form.
///
/// `slots` holds `2 * depth` `(price, volume)` pairs, all bid levels first.
/// This is the unit the codec works on and the basis every delta row is
/// computed against.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScaledMd {
    pub ts: u64,
    pub slots: Vec<(u32, u32)>,
}

impl ScaledMd {
    pub fn from_md(md: &MarketData, depth: usize, scale: u32) -> Result<Self> {
        let mut slots = scale_side(&md.bid, depth, scale, || Error::BadBid)?;
        slots.extend(scale_side(&md.ask, depth, scale, || Error::BadAsk)?);
        Ok(ScaledMd { ts: md.timestamp, slots })
    }

    pub fn to_md(&self, depth: usize, scale: u32) -> MarketData {
        let side = |slots: &[(u32, u32)]| {
            slots
                .iter()
                .map(|&(p, v)| Quote { price: unscale_price(p, scale), volume: v })
                .collect()
        };
        MarketData {
            timestamp: self.ts,
            bid: side(&self.slots[..depth]),
            ask: side(&self.slots[depth..]),
        }
    }

    /// Per-slot differences against `prev`: `None` for untouched slots.
    pub fn delta_from(&self, prev: &ScaledMd) -> (i64, Vec<Option<(i64, i64)>>) {
        let ts_delta = self.ts as i64 - prev.ts as i64;
        let changes = self
            .slots
            .iter()
            .zip(&prev.slots)
            .map(|(&(p, v), &(pp, pv))| {
                if (p, v) == (pp, pv) {
                    None
                } else {
                    Some((i64::from(p) - i64::from(pp), i64::from(v) - i64::from(pv)))
                }
            })
            .collect();
        (ts_delta, changes)
    }

    /// Rebuild an absolute snapshot from a delta row.
    pub fn apply_delta(
        prev: &ScaledMd,
        ts_delta: i64,
        changes: &[Option<(i64, i64)>],
    ) -> Result<Self> {
        if changes.len() != prev.slots.len() {
            return Err(Error::DepthMismatch { expected: prev.slots.len(), got: changes.len() });
        }
        let ts = prev
            .ts
            .checked_add_signed(ts_delta)
            .ok_or(Error::BadTimestamp)?;
        let mut slots = Vec::with_capacity(prev.slots.len());
        for (&(pp, pv), change) in prev.slots.iter().zip(changes) {
            let (p, v) = match change {
                None => (pp, pv),
                Some((dp, dv)) => {
                    let p = u32::try_from(i64::from(pp) + dp).map_err(|_| Error::BadPrice)?;
                    let v = u32::try_from(i64::from(pv) + dv).map_err(|_| Error::BadVolume)?;
                    (p, v)
                }
            };
            slots.push((p, v));
        }
        Ok(ScaledMd { ts, slots })
    }
}

/// Running O/H/L/C over scaled trade prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub open: u32,
    pub high: u32,
    pub low: u32,
    pub close: u32,
}

impl Candle {
    pub fn from_trade(price: u32) -> Self {
        Candle { open: price, high: price, low: price, close: price }
    }

    /// `O` never moves after the first trade.
    pub fn update(&mut self, price: u32) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}
