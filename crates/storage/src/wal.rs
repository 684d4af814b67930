// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL write-ahead log for store mutations.
//!
//! Each entry is a single line of JSON: `{"seq":N,"op":{...}}\n`. Ops are
//! applied to the in-memory tables immediately after appending, so the log
//! is read back only on open (replay) and rewritten on checkpoint.

use crate::state::StoreOp;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur in Wal operations
#[derive(Debug, Error)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct WalRecordRef<'a> {
    seq: u64,
    op: &'a StoreOp,
}

#[derive(Deserialize)]
struct WalRecord {
    seq: u64,
    op: StoreOp,
}

/// Append-only JSONL log.
///
/// An entry is durable once `append` returns: every append ends with a
/// single fsync. A corrupt tail (torn final write) is tolerated on open;
/// replay stops at the first unparseable line with a warning.
pub struct Wal {
    file: File,
    path: PathBuf,
    next_seq: u64,
}

impl Wal {
    /// Open or create a WAL, replaying any existing entries.
    pub fn open(path: &Path) -> Result<(Self, Vec<StoreOp>), WalError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let mut ops = Vec::new();
        let mut max_seq = 0u64;
        let mut reader = BufReader::new(file.try_clone()?);
        let mut line = String::new();
        let mut line_no = 0usize;

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }
            line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let record: WalRecord = match serde_json::from_str(trimmed) {
                Ok(r) => r,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        line = line_no,
                        error = %e,
                        "Corrupt WAL tail, ignoring remaining entries",
                    );
                    break;
                }
            };

            max_seq = max_seq.max(record.seq);
            ops.push(record.op);
        }

        Ok((
            Self {
                file,
                path: path.to_owned(),
                next_seq: max_seq + 1,
            },
            ops,
        ))
    }

    /// Append one op and fsync. Returns the assigned sequence number.
    pub fn append(&mut self, op: &StoreOp) -> Result<u64, WalError> {
        let seq = self.next_seq;
        let record = WalRecordRef { seq, op };
        let mut json_bytes = serde_json::to_vec(&record)?;
        json_bytes.push(b'\n');
        self.file.write_all(&json_bytes)?;
        self.file.sync_all()?;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Atomically replace the log with a single op (a checkpoint snapshot).
    ///
    /// Sequence numbering continues from where it was, so replay ordering
    /// stays monotone across checkpoints.
    pub fn rewrite(&mut self, op: &StoreOp) -> Result<(), WalError> {
        let tmp_path = self.path.with_extension("tmp");
        let seq = self.next_seq;

        {
            let mut tmp_file = File::create(&tmp_path)?;
            let record = WalRecordRef { seq, op };
            let mut json_bytes = serde_json::to_vec(&record)?;
            json_bytes.push(b'\n');
            tmp_file.write_all(&json_bytes)?;
            tmp_file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;
        self.next_seq = seq + 1;

        Ok(())
    }

    /// Next sequence number to be assigned.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }
}

#[cfg(test)]
#[path = "wal_tests.rs"]
mod tests;
