//! Narrow façade over the engine.
//!
//! Resolves (stock, date) through the filesystem collaborator and dispatches
//! to the reader/appender. `Db` is the single handle the dynamic callers
//! flow through: it is either a read view or an append handle, and calling
//! `append` through a read view is the `ReopenInAppendMode` contract error
//! rather than a panic.

use time::Date;

use crate::appender::{AppendOptions, Appender};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::fs::{self, FileKind};
use crate::iter::EventIterator;
use crate::reader::{FileInfo, Reader};

/// An open day file: read view or append handle.
pub enum Db {
    Read(Reader),
    Append(Appender),
}

impl Db {
    /// Open for reading; refuses foreign-version files with `NeedMigration`.
    pub fn open_read(stock: &str, date: Date) -> Result<Db> {
        Reader::open(&fs::path(FileKind::Stock, stock, date)).map(Db::Read)
    }

    /// Migration-tolerant read of a foreign-version file.
    pub fn open_read_migrate(stock: &str, date: Date) -> Result<Db> {
        Reader::open_migrate(&fs::path(FileKind::Stock, stock, date)).map(Db::Read)
    }

    /// Open for appending, creating the file on first use.
    pub fn open_append(opts: AppendOptions) -> Result<Db> {
        let path = fs::path(opts.kind, &opts.stock, opts.date);
        Appender::open(&path, &opts).map(Db::Append)
    }

    pub fn append(&mut self, event: &Event) -> Result<()> {
        match self {
            Db::Append(a) => a.append(event),
            Db::Read(_) => Err(Error::ReopenInAppendMode),
        }
    }

    /// Persist final state and release the handle. Closing a read view is a
    /// no-op: the reader released its handle at open.
    pub fn close(self) -> Result<()> {
        match self {
            Db::Append(a) => a.close(),
            Db::Read(_) => Ok(()),
        }
    }

    pub fn reader(&self) -> Option<&Reader> {
        match self {
            Db::Read(r) => Some(r),
            Db::Append(_) => None,
        }
    }
}

/// Every event of one day file, in file order.
pub fn events(stock: &str, date: Date) -> Result<Vec<Event>> {
    let reader = Reader::open(&fs::path(FileKind::Stock, stock, date))?;
    let events = EventIterator::new(&reader).all_events();
    events
}

/// Header fields and bucket presence, `None` when no file exists.
pub fn info(stock: &str, date: Date) -> Result<Option<FileInfo>> {
    match Reader::open(&fs::path(FileKind::Stock, stock, date)) {
        Ok(reader) => Ok(Some(reader.file_info())),
        Err(Error::NoFile) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Fresh cursor over an open reader; compose `set_range` and `add_filter`
/// on the result before draining it.
pub fn init_reader(reader: &Reader) -> EventIterator<'_> {
    EventIterator::new(reader)
}

/// Pull one event off a cursor, `None` at end of data.
pub fn read_event(iter: &mut EventIterator<'_>) -> Result<Option<Event>> {
    iter.read_event()
}
