//! Ledger snapshots.
//!
//! A snapshot captures the full materialized state so the WAL can be
//! truncated. Layout: 4-byte CRC32 of the bincode body, then the body.
//! Written to a temp file and renamed into place so a crash mid-write leaves
//! the previous snapshot intact.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::wal::crc32_checksum;
use crate::models::{TxRecord, UserAccount, UserId, WithdrawalRequest};

/// Materialized ledger state, as persisted by a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerState {
    pub users: HashMap<UserId, UserAccount>,
    pub transactions: Vec<TxRecord>,
    pub request_cache: HashMap<Uuid, WithdrawalRequest>,
    pub checkpoint: u64,
}

pub fn save(path: impl AsRef<Path>, state: &LedgerState) -> io::Result<()> {
    let path = path.as_ref();
    let body =
        bincode::serialize(state).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let tmp_path = path.with_extension("tmp");
    let mut tmp = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp_path)?;
    tmp.write_all(&crc32_checksum(&body).to_le_bytes())?;
    tmp.write_all(&body)?;
    tmp.sync_all()?;
    drop(tmp);

    fs::rename(&tmp_path, path)
}

pub fn load(path: impl AsRef<Path>) -> io::Result<Option<LedgerState>> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(None);
    }

    let mut file = File::open(path)?;
    let mut crc_buf = [0u8; 4];
    file.read_exact(&mut crc_buf)?;
    let expected = u32::from_le_bytes(crc_buf);

    let mut body = Vec::new();
    file.read_to_end(&mut body)?;

    if crc32_checksum(&body) != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "snapshot checksum mismatch",
        ));
    }

    let state = bincode::deserialize(&body)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some(state))
}
