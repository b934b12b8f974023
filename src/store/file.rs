//! File-backed event store.
//!
//! Layout under the configured directory:
//!
//! - `MANIFEST`: magic bytes and format version
//! - `LOCK`: held exclusively while the store is open
//! - `events.log`: header followed by `[len][msgpack envelope][crc32]` frames
//!
//! The whole log is loaded into memory on open. A partially written final
//! frame (a crash mid-append) is truncated away; a checksum mismatch
//! anywhere else is reported as corruption.

use super::{EventStore, Ledger, Transactional};
use crate::envelope::{Envelope, EventStream, Filter};
use crate::error::{Error, Result};
use crate::types::{EventId, ProducerId, Version};
use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Magic bytes for the store manifest.
const STORE_MAGIC: &[u8; 4] = b"EVL\0";

/// Magic bytes for the event log.
const LOG_MAGIC: &[u8; 4] = b"EVG\0";

/// Current on-disk format version.
const FORMAT_VERSION: u8 = 1;

/// Header length of the event log (magic + version).
const LOG_HEADER_SIZE: u64 = 5;

/// Frames larger than this are refused on write and treated as corruption
/// on read.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// File store configuration.
#[derive(Clone, Debug)]
pub struct FileStoreConfig {
    /// Directory holding the store.
    pub path: PathBuf,

    /// fsync after this many appends (0 and 1 both mean every append).
    pub sync_every: u64,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./events"),
            sync_every: 1,
            create_if_missing: true,
        }
    }
}

struct Writer {
    file: BufWriter<File>,
    /// Log length up to the end of the last complete write.
    len: u64,
    writes_since_sync: u64,
}

/// Event store persisted to an append-only log file.
pub struct FileEventStore {
    config: FileStoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    writer: Mutex<Writer>,

    ledger: RwLock<Ledger>,
}

impl FileEventStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: FileStoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(Error::NotInitialized)
        }
    }

    /// Create a new, empty store.
    pub fn create(config: FileStoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;

        let mut log = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(Self::log_path(&config.path))?;
        log.write_all(LOG_MAGIC)?;
        log.write_all(&[FORMAT_VERSION])?;
        log.sync_all()?;

        tracing::info!(path = %config.path.display(), "created event store");
        Self::assemble(config, lock_file, Ledger::new())
    }

    /// Open an existing store, loading its log.
    pub fn open(config: FileStoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        let lock_file = Self::acquire_lock(&config.path)?;
        let ledger = Self::load(&Self::log_path(&config.path))?;

        tracing::info!(
            path = %config.path.display(),
            events = ledger.len(),
            "opened event store"
        );
        Self::assemble(config, lock_file, ledger)
    }

    fn assemble(config: FileStoreConfig, lock_file: File, ledger: Ledger) -> Result<Self> {
        let file = OpenOptions::new()
            .append(true)
            .open(Self::log_path(&config.path))?;
        let len = file.metadata()?.len();

        Ok(Self {
            config,
            _lock_file: lock_file,
            writer: Mutex::new(Writer {
                file: BufWriter::new(file),
                len,
                writes_since_sync: 0,
            }),
            ledger: RwLock::new(ledger),
        })
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Number of committed events.
    pub fn len(&self) -> usize {
        self.ledger.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.flush()?;
        writer.file.get_ref().sync_all()?;
        writer.writes_since_sync = 0;
        Ok(())
    }

    /// Append `events` as one unit: either every frame is written or the
    /// log is cut back to where it was.
    fn persist(&self, events: &[Envelope]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut batch = Vec::new();
        for event in events {
            Self::write_frame(&mut batch, event)?;
        }

        let mut writer = self.writer.lock();
        let start = writer.len;
        match Self::append(&mut writer, &batch, self.config.sync_every) {
            Ok(()) => {
                writer.len = start + batch.len() as u64;
                Ok(())
            }
            Err(e) => {
                if let Err(rewind) = self.rewind(&mut writer, start) {
                    tracing::error!(
                        path = %self.config.path.display(),
                        error = %rewind,
                        "failed to discard partially written events"
                    );
                }
                Err(e)
            }
        }
    }

    fn append(writer: &mut Writer, batch: &[u8], sync_every: u64) -> Result<()> {
        writer.file.write_all(batch)?;
        writer.file.flush()?;

        writer.writes_since_sync += 1;
        if writer.writes_since_sync >= sync_every.max(1) {
            writer.file.get_ref().sync_all()?;
            writer.writes_since_sync = 0;
        }
        Ok(())
    }

    /// Cut the log back to `len` and continue with an empty write buffer.
    fn rewind(&self, writer: &mut Writer, len: u64) -> Result<()> {
        let file = OpenOptions::new()
            .append(true)
            .open(Self::log_path(&self.config.path))?;
        // The old writer flushes whatever it still buffers when dropped, so
        // truncate only after it is gone.
        drop(std::mem::replace(&mut writer.file, BufWriter::new(file)));
        writer.file.get_ref().set_len(len)?;
        writer.file.get_ref().sync_all()?;
        writer.writes_since_sync = 0;

        tracing::warn!(
            path = %self.config.path.display(),
            len,
            "discarded partially written events"
        );
        Ok(())
    }

    fn load(path: &Path) -> Result<Ledger> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(Error::InvalidFormat("Invalid event log magic".into()));
        }
        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(Error::InvalidFormat(format!(
                "Unsupported event log version: {}",
                version[0]
            )));
        }

        let mut ledger = Ledger::new();
        let mut offset = LOG_HEADER_SIZE;
        while offset < file_len {
            match Self::read_frame(&mut reader) {
                Ok((event, frame_len)) => {
                    ledger.restore(event);
                    offset += frame_len;
                }
                Err(Error::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    tracing::warn!(
                        path = %path.display(),
                        offset,
                        "truncating partially written event frame"
                    );
                    reader.get_ref().set_len(offset)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(ledger)
    }

    fn write_frame(out: &mut Vec<u8>, event: &Envelope) -> Result<()> {
        let encoded = rmp_serde::to_vec(event)?;
        if encoded.len() > MAX_FRAME_SIZE {
            return Err(Error::InvalidEventGiven(format!(
                "event {} encodes to {} bytes, over the {} byte frame limit",
                event.id,
                encoded.len(),
                MAX_FRAME_SIZE
            )));
        }

        let len = encoded.len() as u32;
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&encoded);

        let checksum = crc32fast::hash(&encoded);
        out.extend_from_slice(&checksum.to_le_bytes());

        Ok(())
    }

    /// Read one frame, returning the event and the frame's size on disk.
    fn read_frame(reader: &mut BufReader<File>) -> Result<(Envelope, u64)> {
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_FRAME_SIZE {
            return Err(Error::Corruption("event frame too large".into()));
        }

        let mut encoded = vec![0u8; len];
        reader.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        reader.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);

        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            return Err(Error::Corruption("event frame checksum mismatch".into()));
        }

        let event = rmp_serde::from_slice(&encoded)?;
        Ok((event, 4 + len as u64 + 4))
    }

    fn log_path(path: &Path) -> PathBuf {
        path.join("events.log")
    }

    fn write_manifest(path: &Path) -> Result<()> {
        let mut file = File::create(path.join("MANIFEST"))?;
        file.write_all(STORE_MAGIC)?;
        file.write_all(&[FORMAT_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        let mut file = File::open(path.join("MANIFEST"))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(Error::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != FORMAT_VERSION {
            return Err(Error::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }
        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_file = File::create(path.join("LOCK"))?;
        lock_file.try_lock_exclusive().map_err(|_| Error::Locked)?;
        Ok(lock_file)
    }
}

impl EventStore for FileEventStore {
    fn stream(&self, filter: Option<&Filter>) -> Result<EventStream> {
        Ok(self.ledger.read().stream(filter))
    }

    fn add(&self, producer: &ProducerId, expected: Version, events: Vec<Envelope>) -> Result<()> {
        let mut ledger = self.ledger.write();
        ledger.check(producer, expected, &events)?;
        if !ledger.in_transaction() {
            self.persist(&events)?;
        }
        ledger.append(producer, events);
        Ok(())
    }

    fn event(&self, id: EventId) -> Result<Option<Envelope>> {
        Ok(self.ledger.read().event(id))
    }

    fn version(&self, producer: &ProducerId) -> Result<Version> {
        Ok(self.ledger.read().version(producer))
    }
}

impl Transactional for FileEventStore {
    fn begin(&self) -> Result<()> {
        self.ledger.write().begin()
    }

    fn commit(&self) -> Result<()> {
        let mut ledger = self.ledger.write();
        // A failed write leaves nothing on disk and the events staged, so the
        // caller can still roll back.
        self.persist(ledger.staged_events()?)?;
        let count = ledger.commit()?;
        tracing::debug!(events = count, "file transaction committed");
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let count = self.ledger.write().rollback()?;
        tracing::debug!(events = count, "file transaction rolled back");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.ledger.read().in_transaction()
    }
}

impl Drop for FileEventStore {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            tracing::warn!(
                path = %self.config.path.display(),
                error = %e,
                "failed to sync event store on close"
            );
        }
    }
}
