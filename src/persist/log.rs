//! Append-only event log on disk.
//!
//! Layout: a 5-byte header (magic + version) followed by frames of
//! `[len: u32 LE][msgpack entry][crc32: u32 LE]`. Each entry stores the
//! event body together with its routing metadata.

use crate::error::{FirehoseError, Result};
use crate::events::{Envelope, Routing, StreamEvent};
use crate::types::Sequence;
use fs2::FileExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{sequence_for, EventPersistence};

/// Magic bytes for the event log.
const LOG_MAGIC: &[u8; 4] = b"EVT\0";

/// Current log format version.
const LOG_VERSION: u8 = 1;

const HEADER_SIZE: u64 = 5;

/// Upper bound on a single entry. Appends above it are refused, and reads
/// treat larger lengths as garbage.
const MAX_ENTRY_SIZE: usize = 64 * 1024 * 1024;

/// Length prefix plus trailing checksum.
const FRAME_OVERHEAD: u64 = 8;

#[derive(Serialize)]
struct LogEntryRef<'a> {
    routing: &'a Routing,
    event: &'a StreamEvent,
}

#[derive(Deserialize)]
struct LogEntry {
    routing: Routing,
    event: StreamEvent,
}

struct LogState {
    file: File,
    last: Sequence,
    /// (sequence, frame offset) for every stored entry, in order.
    index: Vec<(Sequence, u64)>,
    /// End of the last complete frame.
    size: u64,
    writes_since_sync: u64,
    /// Set when a failed append could not be rolled back. The file tail no
    /// longer matches `size`, so further appends are refused.
    failed: bool,
}

/// File-backed [`EventPersistence`].
pub struct EventLog {
    path: PathBuf,
    _lock_file: File,
    state: Mutex<LogState>,
    sync_interval: u64,
}

impl EventLog {
    /// Sync to disk every 100 appends.
    const DEFAULT_SYNC_INTERVAL: u64 = 100;

    /// Open or create the log in `dir` with the default sync interval.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_sync_interval(dir, Self::DEFAULT_SYNC_INTERVAL)
    }

    /// Open or create the log with a custom sync interval.
    /// - sync_interval = 0 or 1: sync every append
    /// - sync_interval = 100: sync every 100 appends
    pub fn open_with_sync_interval(dir: impl AsRef<Path>, sync_interval: u64) -> Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let lock_file = Self::acquire_lock(dir)?;
        let path = dir.join("events.log");

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let file_len = file.metadata()?.len();
        let (last, index, size) = if file_len < HEADER_SIZE {
            // Empty, or a crash cut the header short. No frame can exist yet.
            if file_len > 0 {
                tracing::warn!(path = %path.display(), file_len, "rewriting partial event log header");
                file.set_len(0)?;
                file.seek(SeekFrom::Start(0))?;
            }
            file.write_all(LOG_MAGIC)?;
            file.write_all(&[LOG_VERSION])?;
            file.sync_all()?;
            (Sequence::UNASSIGNED, Vec::new(), HEADER_SIZE)
        } else {
            Self::recover(&mut file)?
        };

        file.seek(SeekFrom::Start(size))?;

        tracing::debug!(path = %path.display(), last = %last, entries = index.len(), "opened event log");

        Ok(Self {
            path,
            _lock_file: lock_file,
            state: Mutex::new(LogState {
                file,
                last,
                index,
                size,
                writes_since_sync: 0,
                failed: false,
            }),
            sync_interval: sync_interval.max(1),
        })
    }

    /// Highest sequence stored so far.
    pub fn last_seq(&self) -> Sequence {
        self.state.lock().last
    }

    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Force pending writes to disk.
    pub fn sync(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.file.sync_all()?;
        state.writes_since_sync = 0;
        Ok(())
    }

    fn acquire_lock(dir: &Path) -> Result<File> {
        let lock_file = File::create(dir.join("LOCK"))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| FirehoseError::Locked)?;
        Ok(lock_file)
    }

    /// Rebuild the index from an existing file. A torn or corrupt tail is
    /// cut off at the last intact frame.
    fn recover(file: &mut File) -> Result<(Sequence, Vec<(Sequence, u64)>, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(&mut *file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != LOG_MAGIC {
            return Err(FirehoseError::InvalidFormat("Invalid event log magic".into()));
        }

        let mut version = [0u8; 1];
        reader.read_exact(&mut version)?;
        if version[0] != LOG_VERSION {
            return Err(FirehoseError::InvalidFormat(format!(
                "Unsupported event log version: {}",
                version[0]
            )));
        }

        let mut last = Sequence::UNASSIGNED;
        let mut index = Vec::new();
        let mut offset = HEADER_SIZE;

        while offset < file_len {
            match read_frame(&mut reader) {
                Ok((entry, frame_len)) => {
                    let envelope = Envelope::new(entry.event);
                    if let Some(seq) = envelope.seq() {
                        last = seq;
                        index.push((seq, offset));
                    }
                    offset += frame_len;
                }
                Err(e) => {
                    tracing::warn!(offset, error = %e, "truncating event log at damaged frame");
                    break;
                }
            }
        }

        drop(reader);
        if offset < file_len {
            file.set_len(offset)?;
            file.sync_all()?;
        }

        Ok((last, index, offset))
    }
}

impl EventPersistence for EventLog {
    fn persist(&self, envelope: &mut Envelope) -> Result<()> {
        let mut state = self.state.lock();
        if state.failed {
            return Err(FirehoseError::Persistence(
                "event log disabled after a failed append".into(),
            ));
        }

        let original = envelope.seq();
        let Some(seq) = sequence_for(envelope, state.last)? else {
            return Ok(());
        };

        let frame = match encode_frame(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                // Not stored, so the number stays free for the next append.
                if let Some(original) = original {
                    envelope.assign_seq(original);
                }
                return Err(e);
            }
        };

        let offset = state.size;
        if let Err(failure) = append_frame(&mut state.file, offset, &frame) {
            if let Some(original) = original {
                envelope.assign_seq(original);
            }
            state.failed = !failure.rolled_back;
            return Err(failure.error.into());
        }

        state.size = offset + frame.len() as u64;
        state.last = seq;
        state.index.push((seq, offset));

        state.writes_since_sync += 1;
        if state.writes_since_sync >= self.sync_interval {
            state.file.sync_all()?;
            state.writes_since_sync = 0;
        }

        Ok(())
    }

    fn playback(
        &self,
        since: Sequence,
        callback: &mut dyn FnMut(Arc<Envelope>) -> Result<()>,
    ) -> Result<()> {
        let (start, end) = {
            let state = self.state.lock();
            let pos = state.index.partition_point(|(seq, _)| *seq <= since);
            match state.index.get(pos) {
                Some((_, offset)) => (*offset, state.size),
                None => return Ok(()),
            }
        };

        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(start))?;
        let mut reader = BufReader::new(file);

        let mut offset = start;
        while offset < end {
            let (entry, frame_len) = read_frame(&mut reader)?;
            offset += frame_len;
            callback(Arc::new(Envelope::new(entry.event).with_routing(entry.routing)))?;
        }

        Ok(())
    }
}

/// Encode an envelope as a complete `[len][entry][crc]` frame.
fn encode_frame(envelope: &Envelope) -> Result<Vec<u8>> {
    let encoded = rmp_serde::to_vec(&LogEntryRef {
        routing: envelope.routing(),
        event: envelope.event(),
    })?;
    if encoded.len() > MAX_ENTRY_SIZE {
        return Err(FirehoseError::Persistence(format!(
            "event too large to store: {} bytes (limit {})",
            encoded.len(),
            MAX_ENTRY_SIZE
        )));
    }

    let checksum = crc32fast::hash(&encoded);
    let mut frame = Vec::with_capacity(encoded.len() + FRAME_OVERHEAD as usize);
    frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    frame.extend_from_slice(&encoded);
    frame.extend_from_slice(&checksum.to_le_bytes());
    Ok(frame)
}

/// Append target that can be cut back to a known length.
trait FrameSink: Write {
    fn rewind_to(&mut self, len: u64) -> io::Result<()>;
}

impl FrameSink for File {
    fn rewind_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)?;
        self.seek(SeekFrom::Start(len))?;
        Ok(())
    }
}

struct AppendFailure {
    error: io::Error,
    rolled_back: bool,
}

/// Write one frame in full at `offset`, or cut the sink back to `offset`
/// so the next frame starts where the index expects it. Readers use their
/// own handle, so nothing may stay buffered on this side.
fn append_frame<S: FrameSink>(
    sink: &mut S,
    offset: u64,
    frame: &[u8],
) -> std::result::Result<(), AppendFailure> {
    let Err(error) = sink.write_all(frame).and_then(|()| sink.flush()) else {
        return Ok(());
    };

    tracing::warn!(offset, error = %error, "event log append failed, rolling back");
    let rolled_back = match sink.rewind_to(offset) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(offset, error = %e, "failed to roll back event log append");
            false
        }
    };
    Err(AppendFailure { error, rolled_back })
}

/// Read one frame. Returns the entry and the frame's total length.
fn read_frame<R: Read>(reader: &mut R) -> Result<(LogEntry, u64)> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_ENTRY_SIZE {
        return Err(FirehoseError::Corruption("event log entry too large".into()));
    }

    let mut encoded = vec![0u8; len];
    reader.read_exact(&mut encoded)?;

    let mut checksum_bytes = [0u8; 4];
    reader.read_exact(&mut checksum_bytes)?;
    let stored = u32::from_le_bytes(checksum_bytes);
    let computed = crc32fast::hash(&encoded);
    if stored != computed {
        return Err(FirehoseError::ChecksumMismatch {
            expected: stored,
            got: computed,
        });
    }

    let entry = rmp_serde::from_slice(&encoded)?;
    Ok((entry, FRAME_OVERHEAD + len as u64))
}
