//! Textual file header: the self-describing preamble of every day file.
//!
//! Layout, byte for byte:
//! - line 1 is the literal shebang `#!/usr/bin/env pulsedb`
//! - then `key: value` lines (version, stock, date, depth, scale,
//!   chunk_size, have_candle, in that order on write; any order on read)
//! - lines starting with `#` are comments
//! - the first fully empty line ends the header
//!
//! Unrecognized keys survive a parse as opaque metadata pairs. All the
//! file-wide parameters are fixed at creation; the rest of the engine derives
//! bucket geometry (`number_of_chunks`, `day_start_ms`) from here.

use time::format_description::FormatItem;
use time::macros::format_description;
use time::Date;

use crate::error::{Error, Result};

/// First line of every pulsedb file.
pub const SHEBANG: &str = "#!/usr/bin/env pulsedb";

/// Format version written by this engine. Older files are readable only
/// through a migration-tolerant open.
pub const CURRENT_VERSION: u32 = 2;

const HEADER_DATE: &[FormatItem<'static>] = format_description!("[year]/[month]/[day]");

pub fn format_date(date: Date) -> String {
    // the format description is static and infallible for a valid Date
    date.format(&HEADER_DATE).unwrap_or_default()
}

pub fn parse_header_date(s: &str) -> Result<Date> {
    Date::parse(s, &HEADER_DATE).map_err(|_| Error::BadHeader(format!("bad date `{s}`")))
}

/// Parsed header plus the parameters every other component derives from it.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: u32,
    pub stock: String,
    pub date: Date,
    /// Quote levels per side in every stored snapshot.
    pub depth: usize,
    /// Power-of-ten price multiplier.
    pub scale: u32,
    /// Bucket duration in seconds.
    pub chunk_size: u32,
    pub have_candle: bool,
    /// Unrecognized `key: value` pairs, kept verbatim.
    pub extra: Vec<(String, String)>,
}

impl Header {
    pub fn number_of_chunks(&self) -> usize {
        (86400 / self.chunk_size.max(1)) as usize
    }

    /// Millisecond span of one bucket.
    pub fn chunk_span_ms(&self) -> u64 {
        u64::from(self.chunk_size) * 1000
    }

    /// Midnight UTC of the file's date, in ms since epoch.
    pub fn day_start_ms(&self) -> u64 {
        let secs = self.date.midnight().assume_utc().unix_timestamp();
        secs.max(0) as u64 * 1000
    }

    /// Bucket number for a timestamp, or `None` when it falls outside the
    /// file's calendar day.
    pub fn bucket_of(&self, ts: u64) -> Option<usize> {
        let day_start = self.day_start_ms();
        if ts < day_start {
            return None;
        }
        let bucket = ((ts - day_start) / self.chunk_span_ms()) as usize;
        (bucket < self.number_of_chunks()).then_some(bucket)
    }

    /// Render the header including the terminating blank line.
    pub fn format(&self) -> String {
        let mut out = String::new();
        out.push_str(SHEBANG);
        out.push('\n');
        out.push_str(&format!("version: {}\n", self.version));
        out.push_str(&format!("stock: {}\n", self.stock));
        out.push_str(&format!("date: {}\n", format_date(self.date)));
        out.push_str(&format!("depth: {}\n", self.depth));
        out.push_str(&format!("scale: {}\n", self.scale));
        out.push_str(&format!("chunk_size: {}\n", self.chunk_size));
        out.push_str(&format!("have_candle: {}\n", self.have_candle));
        for (k, v) in &self.extra {
            out.push_str(&format!("{k}: {v}\n"));
        }
        out.push('\n');
        out
    }

    /// Parse a header from the start of `bytes`. Returns the header and the
    /// offset of the first byte after the terminating blank line.
    pub fn parse(bytes: &[u8]) -> Result<(Header, usize)> {
        let mut pos = 0usize;
        let mut pairs: Vec<(String, String)> = Vec::new();
        loop {
            let rest = &bytes[pos..];
            let nl = rest
                .iter()
                .position(|&b| b == b'\n')
                .ok_or(Error::TruncatedInput)?;
            let line = &rest[..nl];
            pos += nl + 1;
            if line.is_empty() {
                break;
            }
            let line = std::str::from_utf8(line)
                .map_err(|_| Error::BadHeader("non-utf8 header line".into()))?;
            if line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| Error::BadHeader(format!("bad header line `{line}`")))?;
            pairs.push((key.trim().to_string(), value.trim().to_string()));
        }

        let mut take = |key: &str| -> Result<String> {
            let idx = pairs
                .iter()
                .position(|(k, _)| k == key)
                .ok_or_else(|| Error::BadHeader(format!("missing key `{key}`")))?;
            Ok(pairs.remove(idx).1)
        };
        let int = |key: &str, v: String| -> Result<u32> {
            v.parse()
                .map_err(|_| Error::BadHeader(format!("bad integer for `{key}`: `{v}`")))
        };

        let version = int("version", take("version")?)?;
        let stock = take("stock")?;
        let date = parse_header_date(&take("date")?)?;
        let depth = int("depth", take("depth")?)? as usize;
        let scale = int("scale", take("scale")?)?;
        let chunk_size = int("chunk_size", take("chunk_size")?)?;
        let have_candle = match take("have_candle")?.as_str() {
            "true" => true,
            "false" => false,
            other => return Err(Error::BadHeader(format!("bad boolean `{other}`"))),
        };

        let header = Header {
            version,
            stock,
            date,
            depth,
            scale,
            chunk_size,
            have_candle,
            extra: pairs,
        };
        Ok((header, pos))
    }
}
