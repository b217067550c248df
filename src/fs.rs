//! Filesystem collaborator: maps (stock, date) to paths and lists what the
//! database directory holds.
//!
//! Layout under the configured root (`PULSEDB_PATH`, default `db`):
//!
//! ```text
//! <root>/<kind>/<STOCK>-<YYYY>-<MM>-<DD>.pulse
//! ```
//!
//! The engine itself never assumes this structure; it consumes resolved
//! paths. Everything here is directory plumbing for the façade and the
//! command-line tools.

use std::collections::BTreeSet;
use std::path::PathBuf;

use time::{Date, Month};

use crate::config;
use crate::error::{Error, Result};

/// File-naming variant: which subdirectory a file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileKind {
    #[default]
    Stock,
    Index,
}

impl FileKind {
    fn dir(self) -> &'static str {
        match self {
            FileKind::Stock => "stock",
            FileKind::Index => "index",
        }
    }
}

/// Database root directory.
pub fn root() -> PathBuf {
    PathBuf::from(config::get_value_or("path", "db"))
}

/// Resolved path for one (stock, date) day file.
pub fn path(kind: FileKind, stock: &str, date: Date) -> PathBuf {
    root().join(kind.dir()).join(format!(
        "{stock}-{:04}-{:02}-{:02}.pulse",
        date.year(),
        u8::from(date.month()),
        date.day()
    ))
}

/// Parse `YYYY-MM-DD` (or `YYYY/MM/DD`) into a date.
pub fn parse_date(s: &str) -> Result<Date> {
    let bad = || Error::BadHeader(format!("bad date `{s}`"));
    let norm = s.replace('/', "-");
    let mut parts = norm.splitn(3, '-');
    let year: i32 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let month: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let day: u8 = parts.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
    let month = Month::try_from(month).map_err(|_| bad())?;
    Date::from_calendar_date(year, month, day).map_err(|_| bad())
}

/// `STOCK-YYYY-MM-DD.pulse` → `(STOCK, date)`.
fn split_day_file(name: &str) -> Option<(&str, Date)> {
    let stem = name.strip_suffix(".pulse")?;
    if !stem.is_ascii() || stem.len() < 12 {
        return None;
    }
    let (stock, rest) = stem.split_at(stem.len() - 11);
    let date = parse_date(rest.strip_prefix('-')?).ok()?;
    (!stock.is_empty()).then_some((stock, date))
}

fn day_files(kind: FileKind) -> Result<Vec<(String, Date)>> {
    let dir = root().join(kind.dir());
    let entries = match std::fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut out = Vec::new();
    for entry in entries {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if let Some((stock, date)) = split_day_file(name) {
                out.push((stock.to_string(), date));
            }
        }
    }
    Ok(out)
}

/// Every stock with at least one day file.
pub fn stocks() -> Result<Vec<String>> {
    let set: BTreeSet<String> = day_files(FileKind::Stock)?
        .into_iter()
        .map(|(stock, _)| stock)
        .collect();
    Ok(set.into_iter().collect())
}

/// Every recorded date for one stock, ascending.
pub fn dates(stock: &str) -> Result<Vec<Date>> {
    let mut out: Vec<Date> = day_files(FileKind::Stock)?
        .into_iter()
        .filter(|(s, _)| s == stock)
        .map(|(_, date)| date)
        .collect();
    out.sort();
    out.dedup();
    Ok(out)
}

/// Dates recorded for all of the given stocks.
pub fn common_dates(stocks: &[&str]) -> Result<Vec<Date>> {
    let mut iter = stocks.iter();
    let Some(first) = iter.next() else {
        return Ok(Vec::new());
    };
    let mut common: BTreeSet<Date> = dates(first)?.into_iter().collect();
    for stock in iter {
        let these: BTreeSet<Date> = dates(stock)?.into_iter().collect();
        common = common.intersection(&these).copied().collect();
    }
    Ok(common.into_iter().collect())
}
