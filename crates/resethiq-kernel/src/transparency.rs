//! Append-only transparency log.
//!
//! One UTF-8 text file, one entry per line, fields tab-separated:
//!
//! ```text
//! timestamp \t receipt_hash \t prev_hash \t entry_hash
//! ```
//!
//! `entry_hash = sha256_hex(prev_hash + "\n" + receipt_hash + "\n" + timestamp)`
//! where `prev_hash` is the preceding line's `entry_hash`, or the literal
//! `GENESIS` for the first line. Truncating the middle, reordering, or
//! editing any line breaks the chain at that point; verifiers replay the
//! whole file forward from `GENESIS`.
//!
//! Appends serialize through an exclusive file lock around the
//! read-last-line / append pair, so concurrent writers cannot interleave.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// `prev_hash` of the first entry.
pub const GENESIS: &str = "GENESIS";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("log line {line} is malformed: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("field contains a reserved separator byte")]
    ReservedByte,
}

/// One parsed log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransparencyEntry {
    pub timestamp: String,
    pub receipt_hash: String,
    pub prev_hash: String,
    pub entry_hash: String,
}

/// Replay outcome. A broken chain is a result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogReport {
    pub ok: bool,
    pub entries: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<usize>,
}

/// Handle on one log file. Clone-free; share behind a reference.
#[derive(Debug)]
pub struct TransparencyLog {
    path: PathBuf,
    guard: Mutex<()>,
}

fn entry_hash(prev_hash: &str, receipt_hash: &str, timestamp: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(b"\n");
    hasher.update(receipt_hash.as_bytes());
    hasher.update(b"\n");
    hasher.update(timestamp.as_bytes());
    hex::encode(hasher.finalize())
}

fn parse_line(line_no: usize, line: &str) -> Result<TransparencyEntry, LogError> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 4 {
        return Err(LogError::Malformed {
            line: line_no,
            reason: format!("expected 4 tab-separated fields, found {}", fields.len()),
        });
    }
    Ok(TransparencyEntry {
        timestamp: fields[0].to_string(),
        receipt_hash: fields[1].to_string(),
        prev_hash: fields[2].to_string(),
        entry_hash: fields[3].to_string(),
    })
}

impl TransparencyLog {
    /// Bind a handle to a log path. No I/O happens until the first append or
    /// verification.
    #[must_use]
    pub fn open<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            guard: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry for `receipt_hash`, timestamped now.
    pub fn append(&self, receipt_hash: &str) -> Result<TransparencyEntry, LogError> {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        self.append_at(receipt_hash, &timestamp)
    }

    /// Append one entry with an explicit timestamp (tests inject fixed ones).
    pub fn append_at(
        &self,
        receipt_hash: &str,
        timestamp: &str,
    ) -> Result<TransparencyEntry, LogError> {
        if receipt_hash.contains(['\t', '\n', '\r']) || timestamp.contains(['\t', '\n', '\r']) {
            return Err(LogError::ReservedByte);
        }

        let _in_process = self.guard.lock();
        let mut file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.lock_exclusive()?;
        let result = (|| {
            let mut content = String::new();
            file.read_to_string(&mut content)?;
            let prev_hash = match content.lines().rev().find(|l| !l.is_empty()) {
                Some(last) => parse_line(content.lines().count(), last)?.entry_hash,
                None => GENESIS.to_string(),
            };

            let entry = TransparencyEntry {
                timestamp: timestamp.to_string(),
                receipt_hash: receipt_hash.to_string(),
                entry_hash: entry_hash(&prev_hash, receipt_hash, timestamp),
                prev_hash,
            };
            let line = format!(
                "{}\t{}\t{}\t{}\n",
                entry.timestamp, entry.receipt_hash, entry.prev_hash, entry.entry_hash
            );
            file.write_all(line.as_bytes())?;
            file.flush()?;
            Ok(entry)
        })();
        let _ = FileExt::unlock(&file);
        result
    }

    /// Replay the chain forward from `GENESIS`, recomputing every
    /// `entry_hash` and checking every stored link.
    pub fn verify(&self) -> Result<LogReport, LogError> {
        let entries = self.read_entries()?;
        let mut prev_hash = GENESIS.to_string();
        for (i, entry) in entries.iter().enumerate() {
            let recomputed = entry_hash(&prev_hash, &entry.receipt_hash, &entry.timestamp);
            if entry.prev_hash != prev_hash || entry.entry_hash != recomputed {
                return Ok(LogReport {
                    ok: false,
                    entries: entries.len(),
                    broken_at: Some(i),
                });
            }
            prev_hash = entry.entry_hash.clone();
        }
        Ok(LogReport {
            ok: true,
            entries: entries.len(),
            broken_at: None,
        })
    }

    /// Parse every line. Structural damage (wrong field count) is an error;
    /// chain validity is [`TransparencyLog::verify`]'s concern.
    pub fn read_entries(&self) -> Result<Vec<TransparencyEntry>, LogError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        content
            .lines()
            .filter(|l| !l.is_empty())
            .enumerate()
            .map(|(i, line)| parse_line(i + 1, line))
            .collect()
    }
}
