use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::limits::MAX_EVENT_BYTES;
use crate::model::Event;

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_event(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_EVENT_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "event too large"));
    }
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    let crc = crc32fast::hash(&payload);
    out.write_all(&len.to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Append-only ledger log.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`, little endian.
/// `len` counts the payload only. A torn or corrupt tail is discarded on replay.
///
/// Appends happen a batch at a time: the whole batch is encoded, written and
/// fsynced together. If any step fails the file is cut back to its length
/// before the batch, so a batch is either entirely durable or entirely absent.
pub struct Wal {
    file: File,
    path: PathBuf,
    len: u64,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            len,
            appends_since_compact: 0,
        })
    }

    /// Durably append `events` as one unit.
    pub fn append_batch<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> io::Result<()> {
        let mut buf = Vec::new();
        let mut count = 0u64;
        for event in events {
            encode_event(&mut buf, event)?;
            count += 1;
        }
        if count == 0 {
            return Ok(());
        }

        let written = self
            .file
            .write_all(&buf)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(trunc) = self.truncate_to_durable() {
                tracing::error!("wal rollback failed after write error: {trunc}");
            }
            return Err(e);
        }

        self.len += buf.len() as u64;
        self.appends_since_compact += count;
        Ok(())
    }

    /// Cut off whatever part of a failed batch reached the file.
    fn truncate_to_durable(&self) -> io::Result<()> {
        self.file.set_len(self.len)?;
        self.file.sync_all()
    }

    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_batch(std::iter::once(event))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len_bytes(&self) -> u64 {
        self.len
    }

    fn tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted log to a temp file and fsync.
    /// This is the slow I/O phase and needs no access to the live log.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::tmp_path(path))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(Self::tmp_path(&self.path), &self.path)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            // Persist the rename itself; not every platform allows opening a directory.
            if let Ok(d) = File::open(dir) {
                let _ = d.sync_all();
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.len = file.metadata()?.len();
        self.file = file;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Read every intact event from the log. Reading stops at the first torn
    /// or corrupt entry; a missing file replays as empty.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_EVENT_BYTES {
                tracing::warn!(entries = events.len(), len, "wal: oversized length prefix, ignoring tail");
                break;
            }

            let mut payload = vec![0u8; len];
            if !read_or_eof(&mut reader, &mut payload)? {
                break;
            }

            let mut crc_buf = [0u8; 4];
            if !read_or_eof(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                tracing::warn!(entries = events.len(), "wal: checksum mismatch, ignoring tail");
                break;
            }

            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    tracing::warn!(entries = events.len(), "wal: undecodable entry ({e}), ignoring tail");
                    break;
                }
            }
        }

        Ok(events)
    }
}

/// `Ok(false)` on a short read at end of file.
fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
