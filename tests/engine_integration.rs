use pulsedb::codec::{self, Row};
use pulsedb::event::{scale_price, set_depth, unscale_price};
use pulsedb::{
    AppendOptions, Appender, Candle, Db, Error, Event, EventIterator, Header, MarketData, Quote,
    Reader, Trade,
};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use time::macros::date;

/// Midnight UTC of 2024-01-05 in ms.
const DAY: u64 = 1_704_412_800_000;
/// One 300-second bucket in ms.
const BUCKET: u64 = 300_000;

fn opts() -> AppendOptions {
    let mut o = AppendOptions::new("TEST", date!(2024 - 01 - 05));
    o.depth = 2;
    o.scale = 100;
    o.chunk_size = 300;
    o.have_candle = true;
    o
}

fn day_path(dir: &Path) -> PathBuf {
    dir.join("TEST-2024-01-05.pulse")
}

fn trade(ts: u64, price: f64, volume: u32) -> Event {
    Event::Trade(Trade { timestamp: ts, price, volume })
}

fn md(ts: u64, bid: &[(f64, u32)], ask: &[(f64, u32)]) -> Event {
    let side = |qs: &[(f64, u32)]| {
        qs.iter()
            .map(|&(price, volume)| Quote { price, volume })
            .collect()
    };
    Event::MarketData(MarketData { timestamp: ts, bid: side(bid), ask: side(ask) })
}

/// What the file hands back: depth-normalized sides, quantized prices.
fn normalized(event: &Event, depth: usize, scale: u32) -> Event {
    let quant = |p: f64| unscale_price(scale_price(p, scale).unwrap(), scale);
    match event {
        Event::Trade(t) => Event::Trade(Trade {
            timestamp: t.timestamp,
            price: quant(t.price),
            volume: t.volume,
        }),
        Event::MarketData(m) => {
            let side = |qs: &[Quote]| {
                set_depth(qs, depth)
                    .iter()
                    .map(|q| Quote { price: quant(q.price), volume: q.volume })
                    .collect()
            };
            Event::MarketData(MarketData {
                timestamp: m.timestamp,
                bid: side(&m.bid),
                ask: side(&m.ask),
            })
        }
    }
}

fn write_events(path: &Path, events: &[Event]) {
    let mut a = Appender::open(path, &opts()).unwrap();
    for e in events {
        a.append(e).unwrap();
    }
    a.close().unwrap();
}

fn read_events(path: &Path) -> Vec<Event> {
    let reader = Reader::open(path).unwrap();
    let events = EventIterator::new(&reader).all_events().unwrap();
    events
}

/// Decode every row of the stream directly, bypassing the iterator.
fn raw_rows(path: &Path) -> Vec<Row> {
    let bytes = std::fs::read(path).unwrap();
    let (header, mut off) = Header::parse(&bytes).unwrap();
    if header.have_candle {
        off += codec::CANDLE_SLOT;
    }
    let data = &bytes[off..];
    let mut pos = codec::OFFSET_CELL * header.number_of_chunks();
    let mut rows = Vec::new();
    while pos < data.len() {
        rows.push(codec::decode_row(data, &mut pos, header.depth).unwrap());
    }
    rows
}

#[test]
fn scenario_a_one_trade_fills_candle_and_presence() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    write_events(&path, &[trade(DAY + 500, 12.34, 1)]);

    let reader = Reader::open(&path).unwrap();
    let info = reader.file_info();
    assert_eq!(info.presence.number_of_chunks, 288);
    assert_eq!(info.presence.occupied, vec![0]);

    let expected = Candle { open: 1234, high: 1234, low: 1234, close: 1234 };
    assert_eq!(reader.candle(), Some(expected));

    // the slot itself, straight off the disk
    let bytes = std::fs::read(&path).unwrap();
    let (_, off) = Header::parse(&bytes).unwrap();
    assert_eq!(codec::decode_candle(&bytes[off..off + 16]), Some(expected));
}

#[test]
fn scenario_b_second_snapshot_is_a_one_slot_delta() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    write_events(
        &path,
        &[
            trade(DAY + 500, 12.34, 1),
            md(DAY + 600, &[(12.30, 5)], &[(12.40, 5)]),
            md(DAY + 700, &[(12.31, 5)], &[(12.40, 5)]),
        ],
    );

    let rows = raw_rows(&path);
    assert_eq!(rows.len(), 3);
    assert!(matches!(rows[0], Row::Trade { .. }));
    assert!(matches!(rows[1], Row::Full { .. }));
    match &rows[2] {
        Row::Delta { ts_delta, changes } => {
            assert_eq!(*ts_delta, 100);
            assert_eq!(changes.iter().flatten().count(), 1, "only bid[0] moved");
        }
        other => panic!("expected delta row, got {other:?}"),
    }

    // both snapshots come back absolute, padded to depth 2
    let events = read_events(&path);
    assert_eq!(events.len(), 3);
    match (&events[1], &events[2]) {
        (Event::MarketData(a), Event::MarketData(b)) => {
            assert_eq!(a.bid, vec![Quote { price: 12.30, volume: 5 }, Quote { price: 0.0, volume: 0 }]);
            assert_eq!(b.bid[0], Quote { price: 12.31, volume: 5 });
            assert_eq!(b.bid[1], Quote { price: 0.0, volume: 0 });
            assert_eq!(b.ask, a.ask);
        }
        other => panic!("expected two snapshots, got {other:?}"),
    }
}

#[test]
fn scenario_c_bucket_rollover_writes_self_contained_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    write_events(
        &path,
        &[
            md(DAY + 100, &[(12.30, 5)], &[(12.40, 5)]),
            md(DAY + 200, &[(12.31, 5)], &[(12.40, 5)]),
            trade(DAY + BUCKET + 10, 12.35, 2),
            md(DAY + BUCKET + 100, &[(12.32, 5)], &[(12.41, 5)]),
        ],
    );

    let reader = Reader::open(&path).unwrap();
    let occupied: Vec<usize> = reader.chunks().iter().map(|c| c.bucket).collect();
    assert_eq!(occupied, vec![0, 1]);

    // the bucket-1 head is a trade, and the snapshot after it was written
    // full again: a seek to bucket 1 decodes with no prior context
    let rows = raw_rows(&path);
    assert!(matches!(rows[2], Row::Trade { .. }));
    assert!(matches!(rows[3], Row::Full { .. }));

    let mut iter = EventIterator::new(&reader);
    iter.set_range(DAY + BUCKET, DAY + 2 * BUCKET);
    let tail = iter.all_events().unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].timestamp(), DAY + BUCKET + 10);
    assert_eq!(tail[1].timestamp(), DAY + BUCKET + 100);
}

#[test]
fn scenario_d_validation_failures_leave_the_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    let mut a = Appender::open(&path, &opts()).unwrap();
    a.append(&trade(DAY + 500, 12.34, 1)).unwrap();
    let before = std::fs::read(&path).unwrap();

    let err = a.append(&md(0, &[(12.30, 5)], &[])).unwrap_err();
    assert!(matches!(err, Error::BadTimestamp));
    let err = a.append(&trade(DAY + 600, f64::NAN, 1)).unwrap_err();
    assert!(matches!(err, Error::BadPrice));
    let err = a
        .append(&md(DAY + 600, &[(-1.0, 5)], &[(12.40, 5)]))
        .unwrap_err();
    assert!(matches!(err, Error::BadBid));
    // next day's first bucket is out of range for this file
    let err = a.append(&trade(DAY + 86_400_000, 12.34, 1)).unwrap_err();
    assert!(matches!(err, Error::NotThisDay { .. }));

    assert_eq!(std::fs::read(&path).unwrap(), before);
    a.close().unwrap();
}

#[test]
fn scenario_e_version_gate_and_migration_tolerant_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    write_events(&path, &[trade(DAY + 500, 12.34, 1)]);

    // age the file by one format version; same line length keeps offsets
    let mut bytes = std::fs::read(&path).unwrap();
    let pos = bytes
        .windows(11)
        .position(|w| w == b"version: 2\n".as_slice())
        .unwrap();
    bytes[pos..pos + 11].copy_from_slice(b"version: 1\n");
    std::fs::write(&path, &bytes).unwrap();

    match Reader::open(&path) {
        Err(Error::NeedMigration(p)) => assert_eq!(p, path),
        other => panic!("expected NeedMigration, got {other:?}"),
    }

    let reader = Reader::open_migrate(&path).unwrap();
    assert_eq!(reader.header().version, 1);
    let events = EventIterator::new(&reader).all_events().unwrap();
    assert_eq!(events.len(), 1);
}

#[test]
fn scenario_f_iterators_are_independent_cursors() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    let events: Vec<Event> = (0..10)
        .map(|i| trade(DAY + 100 + i * 120_000, 12.0 + i as f64 / 100.0, 1))
        .collect();
    write_events(&path, &events);

    let reader = Reader::open(&path).unwrap();
    let mut ranged = EventIterator::new(&reader);
    ranged.set_range(DAY + 100 + 240_000, DAY + 100 + 600_000);
    let mut full = EventIterator::new(&reader);

    // interleave the two cursors; each must see its own sequence
    let mut from_ranged = Vec::new();
    let mut from_full = Vec::new();
    loop {
        let a = ranged.read_event().unwrap();
        let b = full.read_event().unwrap();
        if let Some(e) = a {
            from_ranged.push(e);
        }
        match b {
            Some(e) => from_full.push(e),
            None => break,
        }
    }
    assert_eq!(from_full.len(), 10);
    let expected: Vec<u64> = (2..=5).map(|i| DAY + 100 + i * 120_000).collect();
    let got: Vec<u64> = from_ranged.iter().map(|e| e.timestamp()).collect();
    assert_eq!(got, expected);
}

#[test]
fn roundtrip_equals_input_after_depth_normalization() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    let input = vec![
        md(DAY + 100, &[(12.30, 5), (12.29, 3), (12.28, 9)], &[(12.40, 5)]),
        trade(DAY + 200, 12.34, 7),
        md(DAY + 300, &[(12.31, 5)], &[(12.40, 4), (12.42, 2)]),
        md(DAY + 400, &[(12.31, 6)], &[(12.40, 4), (12.42, 2)]),
        trade(DAY + BUCKET + 50, 12.50, 1),
        md(DAY + BUCKET + 60, &[], &[(12.55, 8)]),
    ];
    write_events(&path, &input);

    let expected: Vec<Event> = input.iter().map(|e| normalized(e, 2, 100)).collect();
    assert_eq!(read_events(&path), expected);
}

#[test]
fn range_reads_equal_filtered_full_reads() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    let input = vec![
        md(DAY + 100, &[(12.30, 5)], &[(12.40, 5)]),
        md(DAY + 200_000, &[(12.31, 5)], &[(12.40, 5)]),
        trade(DAY + BUCKET + 10_000, 12.35, 2),
        md(DAY + BUCKET + 20_000, &[(12.32, 5)], &[(12.41, 5)]),
        trade(DAY + 3 * BUCKET + 5, 12.60, 1),
        md(DAY + 3 * BUCKET + 10, &[(12.61, 2)], &[(12.62, 2)]),
    ];
    write_events(&path, &input);

    let reader = Reader::open(&path).unwrap();
    let all = EventIterator::new(&reader).all_events().unwrap();

    let ranges = [
        (DAY, DAY + 86_400_000),
        // starts mid-bucket-0 while later buckets exist
        (DAY + 150_000, DAY + BUCKET + 15_000),
        (DAY + 100, DAY + 100),
        (DAY + BUCKET, DAY + 2 * BUCKET),
        (DAY + 2 * BUCKET, DAY + 4 * BUCKET),
        (DAY + 4 * BUCKET, DAY + 5 * BUCKET),
    ];
    for (start, end) in ranges {
        let mut iter = EventIterator::new(&reader);
        iter.set_range(start, end);
        let got = iter.all_events().unwrap();
        let expected: Vec<Event> = all
            .iter()
            .filter(|e| (start..=end).contains(&e.timestamp()))
            .cloned()
            .collect();
        assert_eq!(got, expected, "range {start}..={end}");
    }
}

#[test]
fn predicate_filters_compose_with_ranges() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    write_events(
        &path,
        &[
            md(DAY + 100, &[(12.30, 5)], &[(12.40, 5)]),
            trade(DAY + 200, 12.34, 1),
            md(DAY + 300, &[(12.31, 5)], &[(12.40, 5)]),
            trade(DAY + 400, 12.36, 2),
        ],
    );
    let reader = Reader::open(&path).unwrap();
    let mut iter = EventIterator::new(&reader);
    iter.set_range(DAY + 200, DAY + 400)
        .add_filter(|e| matches!(e, Event::Trade(_)));
    let got = iter.all_events().unwrap();
    assert_eq!(got.len(), 2);
    assert!(got.iter().all(|e| matches!(e, Event::Trade(_))));
}

#[test]
fn close_and_reopen_matches_uninterrupted_append() {
    let dir = tempfile::tempdir().unwrap();
    let first = dir.path().join("split.pulse");
    let second = dir.path().join("whole.pulse");
    let head = vec![
        md(DAY + 100, &[(12.30, 5)], &[(12.40, 5)]),
        md(DAY + 200, &[(12.31, 5)], &[(12.40, 5)]),
        trade(DAY + 300, 12.34, 1),
    ];
    let tail = vec![
        // first event after reopen is a delta against the replayed snapshot
        md(DAY + 400, &[(12.31, 6)], &[(12.40, 5)]),
        trade(DAY + BUCKET + 10, 12.50, 2),
        md(DAY + BUCKET + 20, &[(12.51, 1)], &[(12.52, 1)]),
    ];

    write_events(&first, &head);
    let mut a = Appender::open(&first, &opts()).unwrap();
    for e in &tail {
        a.append(e).unwrap();
    }
    a.close().unwrap();

    let all: Vec<Event> = head.iter().chain(&tail).cloned().collect();
    write_events(&second, &all);

    assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
}

#[test]
fn chunk_map_offsets_increase_and_heads_sit_in_their_windows() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    let input: Vec<Event> = (0..6)
        .map(|i| trade(DAY + 50 + i * 2 * BUCKET, 12.0 + i as f64, 1))
        .collect();
    write_events(&path, &input);

    let bytes = std::fs::read(&path).unwrap();
    let (header, mut off) = Header::parse(&bytes).unwrap();
    off += codec::CANDLE_SLOT;
    let data = &bytes[off..];

    let mut prev_offset = 0u32;
    for bucket in 0..header.number_of_chunks() {
        let cell = codec::decode_offset_cell(&data[codec::OFFSET_CELL * bucket..]);
        if cell == 0 {
            continue;
        }
        assert!(cell > prev_offset, "offsets strictly increase");
        prev_offset = cell;
        match codec::peek_timestamp(&data[cell as usize..]).unwrap() {
            codec::Peeked::Absolute(ts) => {
                let lo = DAY + bucket as u64 * BUCKET;
                assert!((lo..lo + BUCKET).contains(&ts), "head of bucket {bucket}");
            }
            codec::Peeked::Relative(_) => panic!("chunk head must be self-contained"),
        }
    }
}

#[test]
fn candle_tracks_first_extreme_and_last_trades() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    write_events(
        &path,
        &[
            trade(DAY + 100, 12.34, 1),
            trade(DAY + 200, 13.00, 1),
            trade(DAY + 300, 11.80, 1),
            md(DAY + 400, &[(12.00, 1)], &[(12.10, 1)]), // quotes never touch the candle
            trade(DAY + 500, 12.50, 1),
        ],
    );
    let reader = Reader::open(&path).unwrap();
    assert_eq!(
        reader.candle(),
        Some(Candle { open: 1234, high: 1300, low: 1180, close: 1250 })
    );
}

#[test]
fn reopen_truncates_a_partial_trailing_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    write_events(
        &path,
        &[
            trade(DAY + 100, 12.34, 1),
            md(DAY + 200, &[(12.30, 5)], &[(12.40, 5)]),
        ],
    );
    let clean_len = std::fs::metadata(&path).unwrap().len();

    // a crash mid-row leaves a dangling tag and half a varint
    let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
    f.seek(SeekFrom::End(0)).unwrap();
    f.write_all(&[codec::TAG_FULL_MD, 0x80, 0x80]).unwrap();
    drop(f);

    let mut a = Appender::open(&path, &opts()).unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), clean_len);
    a.append(&md(DAY + 300, &[(12.31, 5)], &[(12.40, 5)])).unwrap();
    a.close().unwrap();

    let events = read_events(&path);
    assert_eq!(events.len(), 3);
    assert_eq!(events[2].timestamp(), DAY + 300);
}

#[test]
fn validator_rejects_a_tampered_chunk_map() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    write_events(&path, &[trade(DAY + 100, 12.34, 1)]);

    let bytes = std::fs::read(&path).unwrap();
    let (_, mut off) = Header::parse(&bytes).unwrap();
    off += codec::CANDLE_SLOT;

    // point bucket 0 inside the chunk map itself
    let mut tampered = bytes.clone();
    tampered[off..off + 4].copy_from_slice(&codec::encode_offset_cell(4));
    std::fs::write(&path, &tampered).unwrap();
    assert!(matches!(Reader::open(&path), Err(Error::Corrupt(_))));

    // or past the end of the file
    let mut tampered = bytes;
    tampered[off..off + 4].copy_from_slice(&codec::encode_offset_cell(u32::MAX));
    std::fs::write(&path, &tampered).unwrap();
    assert!(matches!(Reader::open(&path), Err(Error::Corrupt(_))));
}

#[test]
fn empty_file_reads_back_empty_and_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    Appender::open(&path, &opts()).unwrap().close().unwrap();

    let reader = Reader::open(&path).unwrap();
    assert!(reader.chunks().is_empty());
    assert!(reader.candle().is_none());
    assert!(EventIterator::new(&reader).all_events().unwrap().is_empty());
    drop(reader);

    let mut a = Appender::open(&path, &opts()).unwrap();
    a.append(&trade(DAY + 100, 12.34, 1)).unwrap();
    a.close().unwrap();
    assert_eq!(read_events(&path).len(), 1);
}

#[test]
fn facade_resolves_paths_through_the_configured_root() {
    let dir = tempfile::tempdir().unwrap();
    std::env::set_var("PULSEDB_PATH", dir.path());

    let mut db = Db::open_append(opts()).unwrap();
    db.append(&trade(DAY + 500, 12.34, 1)).unwrap();
    db.close().unwrap();

    let info = pulsedb::db::info("TEST", date!(2024 - 01 - 05)).unwrap().unwrap();
    assert_eq!(info.presence.occupied, vec![0]);
    assert!(pulsedb::db::info("OTHER", date!(2024 - 01 - 05)).unwrap().is_none());

    let events = pulsedb::db::events("TEST", date!(2024 - 01 - 05)).unwrap();
    assert_eq!(events.len(), 1);

    // the index naming variant lands in its own subdirectory, invisible to
    // stock-kind lookups
    let mut index_opts = opts();
    index_opts.kind = pulsedb::fs::FileKind::Index;
    let mut db = Db::open_append(index_opts).unwrap();
    db.append(&trade(DAY + 600, 45.67, 2)).unwrap();
    db.close().unwrap();

    let index_path =
        pulsedb::fs::path(pulsedb::fs::FileKind::Index, "TEST", date!(2024 - 01 - 05));
    assert!(index_path.starts_with(dir.path().join("index")));
    let reader = Reader::open(&index_path).unwrap();
    let indexed = EventIterator::new(&reader).all_events().unwrap();
    assert_eq!(indexed.len(), 1);
    assert_eq!(indexed[0].timestamp(), DAY + 600);
    // the stock-kind file is untouched by the index-kind append
    assert_eq!(pulsedb::db::events("TEST", date!(2024 - 01 - 05)).unwrap().len(), 1);

    std::env::remove_var("PULSEDB_PATH");
}

#[test]
fn read_handles_refuse_append() {
    let dir = tempfile::tempdir().unwrap();
    let path = day_path(dir.path());
    write_events(&path, &[trade(DAY + 100, 12.34, 1)]);

    let mut db = Db::Read(Reader::open(&path).unwrap());
    let err = db.append(&trade(DAY + 200, 12.35, 1)).unwrap_err();
    assert!(matches!(err, Error::ReopenInAppendMode));
    db.close().unwrap();

    // missing files surface as NoFile
    assert!(matches!(
        Reader::open(&dir.path().join("absent.pulse")),
        Err(Error::NoFile)
    ));
}
