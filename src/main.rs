use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use pulsedb::fs::FileKind;
use pulsedb::{AppendOptions, Db, Error, Event, MarketData, Quote, Trade};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(version, about = "Import a tick stream into a pulsedb day file")]
struct Args {
    /// Input tick file: `trade;<ts_ms>;<price>;<volume>` or
    /// `md;<ts_ms>;<p>:<v>,...;<p>:<v>,...` per line, `#` for comments
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Stock symbol the day file belongs to
    #[arg(long, env = "PULSEDB_STOCK")]
    stock: String,

    /// Calendar date of the file (YYYY-MM-DD)
    #[arg(long, env = "PULSEDB_DATE")]
    date: String,

    /// Quote levels per side stored in each snapshot
    #[arg(long, default_value_t = 1)]
    depth: usize,

    /// Integer price multiplier
    #[arg(long, default_value_t = 100)]
    scale: u32,

    /// Bucket duration in seconds
    #[arg(long, default_value_t = 300)]
    chunk_size: u32,

    /// Skip the candle slot
    #[arg(long, default_value_t = false)]
    no_candle: bool,

    /// Skip fsync on bucket-boundary writes
    #[arg(long, default_value_t = false)]
    nosync: bool,

    /// Store under the index variant of the file-naming scheme
    #[arg(long, default_value_t = false)]
    index: bool,
}

fn parse_quotes(s: &str) -> Option<Vec<Quote>> {
    if s.is_empty() {
        return Some(Vec::new());
    }
    s.split(',')
        .map(|q| {
            let (price, volume) = q.split_once(':')?;
            Some(Quote { price: price.trim().parse().ok()?, volume: volume.trim().parse().ok()? })
        })
        .collect()
}

fn parse_line(line: &str) -> pulsedb::Result<Event> {
    let bad = || Error::InvalidEvent(line.chars().take(80).collect());
    let mut parts = line.split(';');
    let kind = parts.next().unwrap_or_default().trim();
    let ts: u64 = parts
        .next()
        .and_then(|p| p.trim().parse().ok())
        .ok_or_else(bad)?;
    match kind {
        "trade" => {
            let price: f64 = parts.next().and_then(|p| p.trim().parse().ok()).ok_or_else(bad)?;
            // volumes are integral by contract, so a fractional one fails here
            let volume: u32 = parts.next().and_then(|p| p.trim().parse().ok()).ok_or_else(bad)?;
            Ok(Event::Trade(Trade { timestamp: ts, price, volume }))
        }
        "md" => {
            let bid = parts.next().and_then(parse_quotes).ok_or_else(bad)?;
            let ask = parts.next().and_then(parse_quotes).ok_or_else(bad)?;
            Ok(Event::MarketData(MarketData { timestamp: ts, bid, ask }))
        }
        _ => Err(bad()),
    }
}

fn main() -> Result<()> {
    let _ = dotenv();
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let date = pulsedb::fs::parse_date(&args.date)
        .with_context(|| format!("parse date {}", args.date))?;
    let mut opts = AppendOptions::new(&args.stock, date);
    opts.depth = args.depth;
    opts.scale = args.scale;
    opts.chunk_size = args.chunk_size;
    opts.have_candle = !args.no_candle;
    opts.nosync = args.nosync;
    if args.index {
        opts.kind = FileKind::Index;
    }

    let mut db =
        Db::open_append(opts).with_context(|| format!("open day file for {}", args.stock))?;

    let input = BufReader::new(
        File::open(&args.input).with_context(|| format!("open {:?}", args.input))?,
    );
    let mut appended = 0usize;
    for (lineno, line) in input.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let event = parse_line(line).with_context(|| format!("line {}", lineno + 1))?;
        db.append(&event).with_context(|| format!("line {}", lineno + 1))?;
        appended += 1;
    }
    db.close()?;
    info!(appended, stock = %args.stock, "import finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tick_lines() {
        let ev = parse_line("trade;1704412800500;12.34;1").unwrap();
        assert_eq!(
            ev,
            Event::Trade(Trade { timestamp: 1_704_412_800_500, price: 12.34, volume: 1 })
        );

        let ev = parse_line("md;1704412800600;12.30:5,12.29:3;12.40:5").unwrap();
        match ev {
            Event::MarketData(md) => {
                assert_eq!(md.bid.len(), 2);
                assert_eq!(md.ask, vec![Quote { price: 12.40, volume: 5 }]);
            }
            _ => panic!("expected market data"),
        }
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(parse_line("bogus;1;2"), Err(Error::InvalidEvent(_))));
        assert!(matches!(parse_line("trade;1;12.34"), Err(Error::InvalidEvent(_))));
        // fractional volume is not integral
        assert!(matches!(parse_line("trade;1;12.34;0.5"), Err(Error::InvalidEvent(_))));
        assert!(matches!(parse_line("md;1;12.30-5;"), Err(Error::InvalidEvent(_))));
    }
}
