//! Ledger WAL framing.
//!
//! Binary append-only log with an 8-byte record header:
//!
//! ```text
//! ┌────────────┬─────────┬──────────────────────────────────┐
//! │ payload_len│ 2 bytes │ bincode payload size (max 64KB)  │
//! │ entry_type │ 1 byte  │ LedgerOp discriminant            │
//! │ version    │ 1 byte  │ Payload format version (0-255)   │
//! │ checksum   │ 4 bytes │ CRC32 of payload                 │
//! └────────────┴─────────┴──────────────────────────────────┘
//! ```
//!
//! A record is durable once `append` returns: the writer flushes and
//! `sync_data`s before reporting success. On open, the reader replays the
//! log and truncates a torn tail (short read or checksum mismatch) left by
//! a crash mid-write.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use super::op::LedgerOp;

/// WAL record header size in bytes.
pub const WAL_HEADER_SIZE: usize = 8;

/// Current payload format version.
pub const WAL_VERSION: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalHeader {
    pub payload_len: u16,
    pub entry_type: u8,
    pub version: u8,
    pub checksum: u32,
}

impl WalHeader {
    pub fn new(entry_type: u8, payload: &[u8]) -> Self {
        Self {
            payload_len: payload.len() as u16,
            entry_type,
            version: WAL_VERSION,
            checksum: crc32_checksum(payload),
        }
    }

    pub fn to_bytes(&self) -> [u8; WAL_HEADER_SIZE] {
        let mut buf = [0u8; WAL_HEADER_SIZE];
        buf[0..2].copy_from_slice(&self.payload_len.to_le_bytes());
        buf[2] = self.entry_type;
        buf[3] = self.version;
        buf[4..8].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; WAL_HEADER_SIZE]) -> Self {
        Self {
            payload_len: u16::from_le_bytes([buf[0], buf[1]]),
            entry_type: buf[2],
            version: buf[3],
            checksum: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    pub fn verify_checksum(&self, payload: &[u8]) -> bool {
        self.checksum == crc32_checksum(payload)
    }
}

pub fn crc32_checksum(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Appending side of the WAL. One instance per store; the store serializes
/// access through its single writer lock.
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl WalWriter {
    /// Open the log for appending, creating it if absent.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Append one op and make it durable. This is the store's single
    /// fsync-equivalent boundary per compound mutation.
    pub fn append(&mut self, op: &LedgerOp) -> io::Result<()> {
        let payload = bincode::serialize(op)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        if payload.len() > u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("WAL payload too large: {} bytes", payload.len()),
            ));
        }

        let header = WalHeader::new(op.entry_type(), &payload);
        self.writer.write_all(&header.to_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;
        self.writer.get_ref().sync_data()
    }

    /// Truncate the log after a snapshot has captured its effects.
    pub fn reset(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        let file = OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(0)?;
        file.sync_data()?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        Ok(())
    }
}

/// Replay every intact record in the log.
///
/// A torn tail is truncated in place (with a warning) rather than treated as
/// corruption: a crash between `write_all` and `sync_data` legitimately
/// leaves one. The truncated op never reported success to a caller, so
/// dropping it is correct.
pub fn replay(path: impl AsRef<Path>) -> io::Result<Vec<LedgerOp>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Vec::new());
    }

    let mut file = File::open(path)?;
    let mut ops = Vec::new();
    let mut offset: u64 = 0;

    loop {
        let mut header_buf = [0u8; WAL_HEADER_SIZE];
        match file.read_exact(&mut header_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }

        let header = WalHeader::from_bytes(&header_buf);
        let mut payload = vec![0u8; header.payload_len as usize];
        match file.read_exact(&mut payload) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                truncate_tail(path, offset)?;
                break;
            }
            Err(e) => return Err(e),
        }

        if !header.verify_checksum(&payload) {
            truncate_tail(path, offset)?;
            break;
        }

        let op: LedgerOp = bincode::deserialize(&payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        ops.push(op);
        offset += (WAL_HEADER_SIZE + header.payload_len as usize) as u64;
    }

    Ok(ops)
}

fn truncate_tail(path: &Path, offset: u64) -> io::Result<()> {
    warn!(offset, "Torn WAL tail detected, truncating");
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(offset)?;
    file.sync_data()
}
