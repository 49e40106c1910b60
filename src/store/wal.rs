use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on one encoded event. Customers and bookings are a few hundred bytes.
const MAX_RECORD_BYTES: usize = 1 << 20;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only booking log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated or corrupt tail (crash mid-write) is cut off when the log is
///   opened, so new records always follow the last valid one.
/// - A batch that fails to reach disk is rolled back to the last committed
///   length. If the rollback itself fails the log refuses further writes.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Encoded records not yet written.
    pending: Vec<u8>,
    /// Byte length of the valid, synced prefix.
    committed_len: u64,
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the log file at `path`, dropping any invalid tail.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::open_and_replay(path).map(|(wal, _)| wal)
    }

    /// Replay the valid events at `path`, truncate whatever follows them, and
    /// return the log positioned for appending.
    pub fn open_and_replay(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = scan(path)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            tracing::warn!(
                path = %path.display(),
                dropped_bytes = on_disk - valid_len,
                "discarding invalid booking log tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(valid_len))?;
        let wal = Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            committed_len: valid_len,
            poisoned: false,
        };
        Ok((wal, events))
    }

    /// Append one event and fsync. Production code goes through the
    /// group-commit writer instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one encoded event without writing it.
    /// Call `flush_sync()` after the batch to durably commit all buffered events.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        let mut record = Vec::new();
        encode_event(&mut record, event)?;
        self.pending.extend_from_slice(&record);
        Ok(())
    }

    /// Drop buffered events that were never written.
    pub fn discard_pending(&mut self) {
        self.pending.clear();
    }

    /// Write buffered events and fsync. On failure the file is cut back to
    /// its last committed length and the buffered events are dropped.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        if self.poisoned {
            self.pending.clear();
            return Err(io::Error::other("booking log is unusable after a failed rollback"));
        }
        if self.pending.is_empty() {
            return Ok(());
        }
        let written = self
            .file
            .write_all(&self.pending)
            .and_then(|()| self.file.sync_data());
        let batch_len = self.pending.len() as u64;
        self.pending.clear();
        match written {
            Ok(()) => {
                self.committed_len += batch_len;
                Ok(())
            }
            Err(e) => {
                if let Err(rollback) = self.rollback() {
                    tracing::error!(path = %self.path.display(), "booking log rollback failed: {rollback}");
                    self.poisoned = true;
                }
                Err(e)
            }
        }
    }

    fn rollback(&mut self) -> io::Result<()> {
        self.file.set_len(self.committed_len)?;
        self.file.seek(SeekFrom::Start(self.committed_len))?;
        self.file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte length of the valid, synced log.
    pub fn committed_len(&self) -> u64 {
        self.committed_len
    }

    /// Replay the log from disk, returning all valid events.
    /// Truncated/corrupt trailing entries are silently discarded.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        scan(path).map(|(events, _)| events)
    }
}

/// Valid events at `path` and the byte offset just past the last of them.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len: u64 = 0;

    loop {
        let mut len_buf = [0u8; 4];
        match reader.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        let len = u32::from_le_bytes(len_buf) as usize;
        if len > MAX_RECORD_BYTES {
            break; // corrupt length prefix
        }

        let mut payload = vec![0u8; len];
        match reader.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }

        let mut crc_buf = [0u8; 4];
        match reader.read_exact(&mut crc_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break, // truncated
            Err(e) => return Err(e),
        }
        if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
            break;
        }

        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => events.push(event),
            Err(_) => break, // corrupt payload
        }
        valid_len += 8 + len as u64;
    }

    Ok((events, valid_len))
}
