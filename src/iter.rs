//! Streaming cursor over a reader's row buffer.
//!
//! The iterator owns the reconstruction state a delta chain needs: the last
//! absolute snapshot. A full-md row replaces it, a delta-md row is applied
//! against it, a trade leaves it alone. Range seeks jump through the chunk
//! map to a self-contained row and rebuild state from there, so no prefix of
//! the file ever has to be decoded just to satisfy a late range.
//!
//! Iterators are independent: each holds only a shared borrow of the
//! `Reader`, its own cursor, and its own filters.

use crate::codec::{self, Row};
use crate::error::{Error, Result};
use crate::event::{Event, ScaledMd, Trade};
use crate::reader::Reader;

type Predicate<'a> = Box<dyn Fn(&Event) -> bool + 'a>;

pub struct EventIterator<'a> {
    reader: &'a Reader,
    /// Cursor into the reader's buffer (chunk map + rows).
    pos: usize,
    last_md: Option<ScaledMd>,
    range: Option<(u64, u64)>,
    filters: Vec<Predicate<'a>>,
}

impl<'a> EventIterator<'a> {
    /// Cursor at the first row, no reconstruction state yet.
    pub fn new(reader: &'a Reader) -> Self {
        EventIterator {
            reader,
            pos: reader.data_start(),
            last_md: None,
            range: None,
            filters: Vec::new(),
        }
    }

    /// Restrict iteration to `start ..= end` and seek the cursor to the
    /// latest chunk whose first timestamp is at or before `start` (the
    /// earliest chunk when none is). The snapshot basis is invalidated:
    /// the chunk head is self-contained by construction.
    pub fn set_range(&mut self, start: u64, end: u64) -> &mut Self {
        self.range = Some((start, end));
        self.last_md = None;
        let chunks = self.reader.chunks();
        self.pos = chunks
            .iter()
            .rev()
            .find(|c| c.first_ts <= start)
            .or_else(|| chunks.first())
            .map(|c| c.offset as usize)
            .unwrap_or_else(|| self.reader.data_start());
        self
    }

    /// Add a predicate filter; filters apply in declaration order and an
    /// event must pass all of them to be emitted.
    pub fn add_filter(&mut self, predicate: impl Fn(&Event) -> bool + 'a) -> &mut Self {
        self.filters.push(Box::new(predicate));
        self
    }

    /// Decode and emit the next matching event, `None` at end of data or
    /// past the end of the range.
    pub fn read_event(&mut self) -> Result<Option<Event>> {
        let buf = self.reader.buf();
        let header = self.reader.header();
        let depth = header.depth;
        let scale = header.scale;
        loop {
            if self.pos >= buf.len() {
                return Ok(None);
            }
            let row = codec::decode_row(buf, &mut self.pos, depth)?;
            let event = match row {
                Row::Full { ts, slots } => {
                    let md = ScaledMd { ts, slots };
                    let event = Event::MarketData(md.to_md(depth, scale));
                    self.last_md = Some(md);
                    event
                }
                Row::Delta { ts_delta, changes } => {
                    let prev = self.last_md.as_ref().ok_or(Error::OrphanDelta)?;
                    let md = ScaledMd::apply_delta(prev, ts_delta, &changes)?;
                    let event = Event::MarketData(md.to_md(depth, scale));
                    self.last_md = Some(md);
                    event
                }
                Row::Trade { ts, price, volume } => Event::Trade(Trade {
                    timestamp: ts,
                    price: crate::event::unscale_price(price, scale),
                    volume,
                }),
            };
            if let Some((start, end)) = self.range {
                let ts = event.timestamp();
                if ts < start {
                    continue;
                }
                if ts > end {
                    self.pos = buf.len();
                    return Ok(None);
                }
            }
            if self.filters.iter().all(|f| f(&event)) {
                return Ok(Some(event));
            }
        }
    }

    /// Drain the cursor into a vector.
    pub fn all_events(&mut self) -> Result<Vec<Event>> {
        let mut out = Vec::new();
        while let Some(event) = self.read_event()? {
            out.push(event);
        }
        Ok(out)
    }
}

impl Iterator for EventIterator<'_> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_event().transpose()
    }
}
