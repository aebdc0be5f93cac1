use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use plend_ledger::LedgerEvent;

use crate::error::{FabricError, Result};

/// Flush/sync strategy for the journal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every write.
    EveryWrite,
    /// Flush to the OS and rely on page-cache writeback.
    #[default]
    OsDefault,
}

/// Where the journal lives and how hard it syncs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub path: PathBuf,
    pub sync_every_write: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("plend-events.journal"),
            sync_every_write: false,
        }
    }
}

impl JournalConfig {
    pub fn sync_mode(&self) -> SyncMode {
        if self.sync_every_write {
            SyncMode::EveryWrite
        } else {
            SyncMode::OsDefault
        }
    }
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

struct JournalWriter {
    writer: BufWriter<File>,
    /// Current write offset in the journal file.
    offset: u64,
}

/// Append-only journal of ledger events.
///
/// On-disk format, one frame per event:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (bincode-serialized LedgerEvent)]
/// ```
///
/// Recovery reads front-to-back. Frames that fail the CRC check are skipped;
/// a frame whose declared length runs past the end of the file is a torn
/// write and ends recovery. The torn bytes are cut off so later appends
/// start on a frame boundary.
pub struct EventJournal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    sync_mode: SyncMode,
}

impl EventJournal {
    /// Open (or create) a journal file at the given path.
    pub fn open(path: &Path, sync_mode: SyncMode) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let offset = file.metadata()?.len();
        let writer = BufWriter::new(file);

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(JournalWriter { writer, offset }),
            sync_mode,
        })
    }

    pub fn from_config(config: &JournalConfig) -> Result<Self> {
        Self::open(&config.path, config.sync_mode())
    }

    /// Append one event. Returns the byte offset of its frame.
    pub fn append(&self, event: &LedgerEvent) -> Result<u64> {
        let payload =
            bincode::serialize(event).map_err(|e| FabricError::Serialization(e.to_string()))?;
        let length = u32::try_from(payload.len())
            .map_err(|_| FabricError::Serialization(format!("event {} too large", event.seq)))?;
        let crc = crc32fast::hash(&payload);

        let mut w = self
            .writer
            .lock()
            .map_err(|_| FabricError::LockPoisoned("journal"))?;
        let frame_offset = w.offset;

        w.writer.write_all(&length.to_le_bytes())?;
        w.writer.write_all(&crc.to_le_bytes())?;
        w.writer.write_all(&payload)?;
        w.writer.flush()?;
        if self.sync_mode == SyncMode::EveryWrite {
            w.writer.get_ref().sync_all()?;
        }

        w.offset += HEADER_SIZE as u64 + u64::from(length);

        debug!(offset = frame_offset, seq = event.seq, len = length, "journal append");
        Ok(frame_offset)
    }

    /// Recover every intact event, in ledger order, without duplicates.
    ///
    /// A frame whose `seq` is not above the last recovered one is dropped, so
    /// an event appended twice across a crash replays once. Anything after
    /// the last whole frame is truncated and the write offset reset to it.
    pub fn recover(&self) -> Result<Vec<LedgerEvent>> {
        let mut w = self
            .writer
            .lock()
            .map_err(|_| FabricError::LockPoisoned("journal"))?;
        w.writer.flush()?;

        let mut file = BufReader::new(File::open(&self.path)?);
        let file_len = file.get_ref().metadata()?.len();
        let mut events: Vec<LedgerEvent> = Vec::new();
        let mut offset: u64 = 0;

        while offset + HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(offset))?;

            let mut header = [0u8; HEADER_SIZE];
            match file.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }

            let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            let frame_end = offset + HEADER_SIZE as u64 + u64::from(length);

            if length == 0 || frame_end > file_len {
                warn!(offset, length, file_len, "torn journal frame; stopping recovery");
                break;
            }

            let mut payload = vec![0u8; length as usize];
            match file.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    warn!(offset, "truncated journal frame; stopping recovery");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
            offset = frame_end;

            let actual_crc = crc32fast::hash(&payload);
            if actual_crc != expected_crc {
                warn!(
                    offset,
                    expected = expected_crc,
                    actual = actual_crc,
                    "journal CRC mismatch; skipping frame"
                );
                continue;
            }

            let event = match bincode::deserialize::<LedgerEvent>(&payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(offset, error = %e, "undecodable journal frame; skipping");
                    continue;
                }
            };

            match events.last() {
                Some(last) if event.seq <= last.seq => {
                    debug!(seq = event.seq, last = last.seq, "duplicate journal frame");
                }
                _ => events.push(event),
            }
        }

        if offset < file_len {
            warn!(valid_end = offset, file_len, "truncating torn journal tail");
            w.writer.get_ref().set_len(offset)?;
            w.writer.get_ref().sync_all()?;
        }
        w.offset = offset;

        debug!(recovered = events.len(), "journal recovery complete");
        Ok(events)
    }

    /// Current write offset.
    pub fn offset(&self) -> u64 {
        self.writer.lock().map(|w| w.offset).unwrap_or(0)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
