//! Write-ahead log: a single non-rotating journal file that stages mutations before they
//! are folded into the main file by a checkpoint.
//!
//! Grounded on the "fixed, truncated-on-checkpoint single segment" pattern this crate's
//! manifest-log lineage uses (one journal file, reset to a fresh header once its contents
//! are durably reflected elsewhere) rather than the rotating multi-segment WAL design also
//! present in that lineage — this store has exactly one thing to checkpoint into (the main
//! file), so there is nothing to rotate between.

#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::io::{Reader, Writer};

/// Magic bytes identifying a WAL file: ASCII `"TWAL"` read little-endian.
pub const WAL_MAGIC: u32 = 0x4C41_5754;
/// Current on-disk WAL format version.
pub const WAL_VERSION: u16 = 1;
/// Size in bytes of the fixed WAL header.
pub const WAL_HEADER_SIZE: u64 = 16;

/// Errors specific to WAL operations. Folded into [`crate::error::StoreError`] at the
/// `store` boundary via `#[from]`.
#[derive(Debug, Error)]
pub enum WalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wal framing error: {0}")]
    Frame(#[from] crate::io::IoFrameError),

    #[error("wal header has bad magic")]
    BadMagic,

    #[error("wal header version {found} unsupported (max {max})")]
    UnsupportedVersion { found: u16, max: u16 },

    #[error("unknown wal op code {0}")]
    BadOpCode(u8),
}

type WalResult<T> = std::result::Result<T, WalError>;

/// The operation a [`WalEntry`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add = 1,
    Update = 2,
    Delete = 3,
}

impl Op {
    fn from_u8(b: u8) -> WalResult<Self> {
        match b {
            1 => Ok(Op::Add),
            2 => Ok(Op::Update),
            3 => Ok(Op::Delete),
            other => Err(WalError::BadOpCode(other)),
        }
    }
}

/// One staged mutation: `op` on `(type_index, id)`, carrying the record's encoded payload
/// for ADD/UPDATE (empty for DELETE).
#[derive(Debug, Clone)]
pub struct WalEntry {
    pub op: Op,
    pub type_index: u8,
    pub id: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy)]
struct WalHeader {
    version: u16,
    flags: u16,
    witnessed_main_crc: u32,
    entry_count: u32,
}

impl WalHeader {
    fn fresh(witnessed_main_crc: u32) -> Self {
        Self {
            version: WAL_VERSION,
            flags: 0,
            witnessed_main_crc,
            entry_count: 0,
        }
    }

    fn encode(&self, file: &mut File) -> WalResult<()> {
        file.seek(SeekFrom::Start(0))?;
        let mut w = Writer::new(&mut *file as &mut dyn Write);
        w.write_u32(WAL_MAGIC)?;
        w.write_u16(self.version)?;
        w.write_u16(self.flags)?;
        w.write_u32(self.witnessed_main_crc)?;
        w.write_u32(self.entry_count)?;
        w.flush()?;
        Ok(())
    }

    fn decode(file: &mut File) -> WalResult<Self> {
        file.seek(SeekFrom::Start(0))?;
        let mut r = Reader::new(&mut *file as &mut dyn Read);
        let magic = r.read_u32()?;
        if magic != WAL_MAGIC {
            return Err(WalError::BadMagic);
        }
        let version = r.read_u16()?;
        if version > WAL_VERSION {
            return Err(WalError::UnsupportedVersion {
                found: version,
                max: WAL_VERSION,
            });
        }
        let flags = r.read_u16()?;
        let witnessed_main_crc = r.read_u32()?;
        let entry_count = r.read_u32()?;
        Ok(Self {
            version,
            flags,
            witnessed_main_crc,
            entry_count,
        })
    }
}

/// A single, fixed write-ahead log file.
pub struct Wal {
    path: PathBuf,
    file: File,
    header: WalHeader,
}

impl Wal {
    /// Open `path`, creating a fresh WAL (with `witnessed_main_crc`) if it doesn't exist or
    /// its header fails to validate.
    pub fn open(path: impl AsRef<Path>, witnessed_main_crc: u32) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();
        let existed = path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let header = if existed {
            match WalHeader::decode(&mut file) {
                Ok(h) => h,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "wal header invalid, recreating");
                    let h = WalHeader::fresh(witnessed_main_crc);
                    file.set_len(0)?;
                    h.encode(&mut file)?;
                    h
                }
            }
        } else {
            let h = WalHeader::fresh(witnessed_main_crc);
            h.encode(&mut file)?;
            h
        };

        debug!(path = %path.display(), entries = header.entry_count, "wal opened");
        Ok(Self { path, file, header })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entry_count(&self) -> u32 {
        self.header.entry_count
    }

    pub fn witnessed_main_crc(&self) -> u32 {
        self.header.witnessed_main_crc
    }

    pub fn file_size(&self) -> WalResult<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Whether entry-count or size thresholds have been crossed.
    pub fn should_checkpoint(&self, max_entries: u32, max_size: u64) -> WalResult<bool> {
        Ok(self.header.entry_count >= max_entries || self.file_size()? >= max_size)
    }

    /// Append one entry, updating the header's entry count in place.
    pub fn append(&mut self, op: Op, type_index: u8, id: u32, payload: &[u8]) -> WalResult<()> {
        let prior_len = self.file.metadata()?.len();
        let result = self.append_inner(op, type_index, id, payload);
        if result.is_err() {
            // Don't leave a half-written entry behind.
            let _ = self.file.set_len(prior_len);
        }
        result
    }

    fn append_inner(&mut self, op: Op, type_index: u8, id: u32, payload: &[u8]) -> WalResult<()> {
        self.file.seek(SeekFrom::End(0))?;
        let data_len: u32 = payload.len().try_into().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "payload too large")
        })?;

        // CRC covers everything after the entry's own CRC field: op, type_index, id,
        // data_len, payload.
        let mut crc_buf = Vec::with_capacity(10 + payload.len());
        {
            let mut w = Writer::new(&mut crc_buf);
            w.write_u8(op as u8)?;
            w.write_u8(type_index)?;
            w.write_u32(id)?;
            w.write_u32(data_len)?;
            w.write_bytes(payload)?;
        }
        let crc = crate::io::crc32(&crc_buf);

        let mut w = Writer::new(&mut self.file as &mut dyn Write);
        w.write_u32(crc)?;
        w.write_bytes(&crc_buf)?;
        w.flush()?;

        self.header.entry_count += 1;
        self.header.encode(&mut self.file)?;
        self.file.sync_data()?;
        trace!(op = ?op, type_index, id, "wal entry appended");
        Ok(())
    }

    /// Read the valid prefix of entries recorded by this WAL.
    ///
    /// Stops at the first entry that fails its CRC check (or runs past EOF) and treats
    /// everything from that point on as a torn write from an interrupted append. When a
    /// torn tail is found, the file and header are truncated in place so the WAL is
    /// self-consistent again before the caller does anything else with it.
    pub fn read_all(&mut self) -> WalResult<Vec<WalEntry>> {
        self.file.seek(SeekFrom::Start(WAL_HEADER_SIZE))?;
        let mut out = Vec::with_capacity(self.header.entry_count as usize);
        let mut offset = WAL_HEADER_SIZE;
        let mut truncate_at: Option<u64> = None;

        {
            let mut r = Reader::new(&mut self.file as &mut dyn Read);
            for _ in 0..self.header.entry_count {
                match Self::read_one_entry(&mut r) {
                    Some((entry, bytes_read)) => {
                        out.push(entry);
                        offset += bytes_read;
                    }
                    None => {
                        truncate_at = Some(offset);
                        break;
                    }
                }
            }
        }

        if let Some(end) = truncate_at {
            warn!(
                valid_entries = out.len(),
                path = %self.path.display(),
                "wal tail failed validation, truncating"
            );
            self.file.set_len(end)?;
            self.header.entry_count = out.len() as u32;
            self.header.encode(&mut self.file)?;
            self.file.sync_all()?;
        }

        Ok(out)
    }

    /// Attempt to read one entry, returning its encoded size in bytes (CRC field included)
    /// on success. `None` means the entry was missing, truncated, or failed its checksum.
    fn read_one_entry(r: &mut Reader<&mut dyn Read>) -> Option<(WalEntry, u64)> {
        let stored_crc = r.read_u32().ok()?;
        let op_byte = r.read_u8().ok()?;
        let type_index = r.read_u8().ok()?;
        let id = r.read_u32().ok()?;
        let data_len = r.read_u32().ok()?;
        let payload = r.read_vec(data_len as usize).ok()?;

        let mut crc_buf = Vec::with_capacity(10 + payload.len());
        {
            let mut w = Writer::new(&mut crc_buf);
            w.write_u8(op_byte).ok()?;
            w.write_u8(type_index).ok()?;
            w.write_u32(id).ok()?;
            w.write_u32(data_len).ok()?;
            w.write_bytes(&payload).ok()?;
        }
        if crate::io::crc32(&crc_buf) != stored_crc {
            return None;
        }
        let op = Op::from_u8(op_byte).ok()?;
        let size = 4 + 1 + 1 + 4 + 4 + payload.len() as u64;
        Some((
            WalEntry {
                op,
                type_index,
                id,
                payload,
            },
            size,
        ))
    }

    /// Reset to an empty WAL with a fresh header recording `witnessed_main_crc`. Called
    /// after a successful checkpoint.
    pub fn reset(&mut self, witnessed_main_crc: u32) -> WalResult<()> {
        self.file.set_len(0)?;
        self.header = WalHeader::fresh(witnessed_main_crc);
        self.header.encode(&mut self.file)?;
        self.file.sync_all()?;
        debug!(path = %self.path.display(), "wal reset after checkpoint");
        Ok(())
    }
}
