use anyhow::{bail, Context, Result};
use clap::Parser;
use pulsedb::{db, Event, Reader};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(about = "Play a pulsedb day file and print its events")]
struct Args {
    /// Day file to read; alternative to --stock/--date
    #[arg(long, short = 'i')]
    input: Option<PathBuf>,

    /// Stock symbol, resolved through the configured database root
    #[arg(long, env = "PULSEDB_STOCK")]
    stock: Option<String>,

    /// Calendar date (YYYY-MM-DD)
    #[arg(long, env = "PULSEDB_DATE")]
    date: Option<String>,

    /// Only events at or after this timestamp (ms since epoch)
    #[arg(long)]
    from: Option<u64>,

    /// Only events at or before this timestamp (ms since epoch)
    #[arg(long)]
    to: Option<u64>,

    /// Emit events as JSON lines instead of text
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Print header fields and bucket presence instead of events
    #[arg(long, default_value_t = false)]
    info: bool,

    /// Open files written by another format version (skips validation)
    #[arg(long, default_value_t = false)]
    migrate: bool,

    /// Resolve --stock/--date under the index variant of the naming scheme
    #[arg(long, default_value_t = false)]
    index: bool,
}

fn open(args: &Args) -> Result<Reader> {
    let kind = if args.index {
        pulsedb::fs::FileKind::Index
    } else {
        pulsedb::fs::FileKind::Stock
    };
    let path = match (&args.input, &args.stock, &args.date) {
        (Some(path), _, _) => path.clone(),
        (None, Some(stock), Some(date)) => {
            let date = pulsedb::fs::parse_date(date)?;
            pulsedb::fs::path(kind, stock, date)
        }
        _ => bail!("pass --input, or --stock together with --date"),
    };
    let reader = if args.migrate {
        Reader::open_migrate(&path)
    } else {
        Reader::open(&path)
    };
    Ok(reader.with_context(|| format!("open {:?}", path))?)
}

fn print_info(reader: &Reader) {
    let info = reader.file_info();
    let scale = f64::from(info.scale);
    println!("stock: {}", info.stock);
    println!("date: {}", pulsedb::header::format_date(info.date));
    println!("version: {}", info.version);
    println!("depth: {}", info.depth);
    println!("scale: {}", info.scale);
    println!("chunk_size: {}", info.chunk_size);
    println!(
        "chunks: {}/{} occupied {:?}",
        info.presence.occupied.len(),
        info.presence.number_of_chunks,
        info.presence.occupied
    );
    match info.candle {
        Some(c) if info.have_candle => println!(
            "candle: O={:.2} H={:.2} L={:.2} C={:.2}",
            f64::from(c.open) / scale,
            f64::from(c.high) / scale,
            f64::from(c.low) / scale,
            f64::from(c.close) / scale
        ),
        _ => println!("candle: none"),
    }
}

fn print_event(event: &Event, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        Event::Trade(t) => {
            println!("TRADE ts={} price={} vol={}", t.timestamp, t.price, t.volume)
        }
        Event::MarketData(md) => {
            let side = |quotes: &[pulsedb::Quote]| {
                quotes
                    .iter()
                    .map(|q| format!("{}x{}", q.price, q.volume))
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            println!(
                "MD ts={} bid=[{}] ask=[{}]",
                md.timestamp,
                side(&md.bid),
                side(&md.ask)
            );
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let reader = open(&args)?;
    if args.info {
        print_info(&reader);
        return Ok(());
    }

    let mut iter = db::init_reader(&reader);
    if args.from.is_some() || args.to.is_some() {
        iter.set_range(args.from.unwrap_or(0), args.to.unwrap_or(u64::MAX));
    }

    let (mut md, mut trades) = (0usize, 0usize);
    while let Some(event) = db::read_event(&mut iter)? {
        match event {
            Event::MarketData(_) => md += 1,
            Event::Trade(_) => trades += 1,
        }
        print_event(&event, args.json)?;
    }
    eprintln!("Read {} events: {} market data, {} trades.", md + trades, md, trades);
    Ok(())
}
