//! Engine-step receipts.
//!
//! Every processing engine emits one receipt per step: a self-hashing record
//! of its inputs, parameters, and outputs. `receipt_hash` is the SHA-512 of
//! the canonical JSON of all other fields, so any edit to a persisted receipt
//! is detectable. Steps chain by carrying the predecessor's hash.

use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::attest::EnvSnapshot;
use crate::canonical::{self, CanonicalError};

/// Receipt schema id.
pub const RECEIPT_VERSION: &str = "resethiq.receipt.v1";

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("canonicalization: {0}")]
    Canonical(#[from] CanonicalError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("receipt encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One engine step, immutable once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub version: String,
    pub engine: String,
    pub run_id: String,
    pub created_at: String,
    pub inputs: Value,
    pub params: Value,
    pub outputs: Value,
    pub environment: EnvSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_receipt_hash: Option<String>,
    pub receipt_hash: String,
}

impl Receipt {
    /// Build a receipt for one engine step, hashing every field except the
    /// hash itself.
    pub fn build(
        engine: impl Into<String>,
        inputs: Value,
        params: Value,
        outputs: Value,
        environment: EnvSnapshot,
        prev_receipt_hash: Option<String>,
    ) -> Result<Self, ReceiptError> {
        let mut receipt = Self {
            version: RECEIPT_VERSION.to_string(),
            engine: engine.into(),
            run_id: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            inputs,
            params,
            outputs,
            environment,
            prev_receipt_hash,
            receipt_hash: String::new(),
        };
        receipt.receipt_hash = receipt.compute_hash()?;
        Ok(receipt)
    }

    /// Recompute the hash over all fields except `receipt_hash`.
    pub fn compute_hash(&self) -> Result<String, ReceiptError> {
        let mut tree = serde_json::to_value(self)?;
        if let Some(fields) = tree.as_object_mut() {
            fields.remove("receipt_hash");
        }
        Ok(canonical::canonical_sha512_hex(&tree)?)
    }

    /// Write the receipt as `receipt.<engine>.json` next to its outputs.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf, ReceiptError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("receipt.{}.json", self.engine));
        let mut body = serde_json::to_vec_pretty(self)?;
        body.push(b'\n');
        std::fs::write(&path, body)?;
        Ok(path)
    }
}

/// Chain builder: links each new receipt to the previous one's hash.
#[derive(Debug)]
pub struct ReceiptChain {
    environment: EnvSnapshot,
    last_hash: Option<String>,
    receipts: Vec<Receipt>,
}

impl ReceiptChain {
    #[must_use]
    pub fn new(environment: EnvSnapshot) -> Self {
        Self {
            environment,
            last_hash: None,
            receipts: Vec::new(),
        }
    }

    /// Emit the next step in the chain.
    pub fn push(
        &mut self,
        engine: impl Into<String>,
        inputs: Value,
        params: Value,
        outputs: Value,
    ) -> Result<&Receipt, ReceiptError> {
        let receipt = Receipt::build(
            engine,
            inputs,
            params,
            outputs,
            self.environment.clone(),
            self.last_hash.clone(),
        )?;
        self.last_hash = Some(receipt.receipt_hash.clone());
        self.receipts.push(receipt);
        Ok(&self.receipts[self.receipts.len() - 1])
    }

    #[must_use]
    pub fn receipts(&self) -> &[Receipt] {
        &self.receipts
    }
}

/// Chain verification outcome. A broken link is a result, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub ok: bool,
    pub length: usize,
    /// Index of the first receipt whose hash or link fails, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<usize>,
}

/// Recompute every receipt hash and check each `prev_receipt_hash` link.
pub fn verify_chain(receipts: &[Receipt]) -> Result<ChainReport, ReceiptError> {
    let mut prev: Option<&str> = None;
    for (i, receipt) in receipts.iter().enumerate() {
        let recomputed = receipt.compute_hash()?;
        let link_ok = receipt.prev_receipt_hash.as_deref() == prev;
        if recomputed != receipt.receipt_hash || !link_ok {
            return Ok(ChainReport {
                ok: false,
                length: receipts.len(),
                broken_at: Some(i),
            });
        }
        prev = Some(&receipt.receipt_hash);
    }
    Ok(ChainReport {
        ok: true,
        length: receipts.len(),
        broken_at: None,
    })
}
