//! Streaming content fingerprinter.
//!
//! One pass over the artifact produces everything the rest of the kernel
//! needs: dual file digests (BLAKE2b-512 + SHA-512) over the raw bytes,
//! ordered chunk leaf hashes, and the Merkle commitment. Auxiliary memory is
//! bounded by one transport buffer plus at most one partial chunk; only the
//! leaves vector grows with input size.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use blake2::Blake2b512;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use thiserror::Error;

use crate::merkle::{self, LeafHash};

/// Default chunk width partitioning the byte stream into leaves (4 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 4 * 1024 * 1024;

/// Transport read size. Chunk boundaries do not depend on it.
const READ_BUF_SIZE: usize = 1024 * 1024;

/// Name of the commitment hash, as it appears on the wire.
pub const MERKLE_ALGORITHM: &str = "blake2b512";

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("chunk size must be a positive integer")]
    InvalidChunkSize,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Validated chunking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    chunk_size: u64,
}

impl ChunkPolicy {
    pub fn new(chunk_size: u64) -> Result<Self, FingerprintError> {
        if chunk_size == 0 {
            return Err(FingerprintError::InvalidChunkSize);
        }
        Ok(Self { chunk_size })
    }

    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }
}

impl Default for ChunkPolicy {
    /// The 4 MiB default used by the CLI surface.
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

/// Digests over the raw byte stream. Two algorithms so that a weakening of
/// either one does not void the attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigests {
    pub blake2b_512: String,
    pub sha512: String,
}

/// The structural commitment recorded in claims and bundles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleCommitment {
    pub algorithm: String,
    pub root: String,
    pub leaf_count: u64,
    pub chunk_size: u64,
}

/// Everything one pass over the artifact yields.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    /// Total bytes consumed.
    pub bytes: u64,
    /// Number of chunk leaves (the last one may be short).
    pub chunks: u64,
    /// Ordered leaf hashes; index i covers the i-th chunk.
    pub leaves: Vec<LeafHash>,
    pub file_digests: FileDigests,
    pub merkle: MerkleCommitment,
}

/// Fingerprint an open reader.
pub fn fingerprint_reader<R: Read>(
    mut reader: R,
    policy: ChunkPolicy,
) -> Result<Fingerprint, FingerprintError> {
    let chunk_size = usize::try_from(policy.chunk_size())
        .map_err(|_| FingerprintError::InvalidChunkSize)?;

    let mut file_blake = Blake2b512::new();
    let mut file_sha = Sha512::new();
    let mut pending: Vec<u8> = Vec::new();
    let mut leaves: Vec<LeafHash> = Vec::new();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        total += n as u64;
        file_blake.update(&buf[..n]);
        file_sha.update(&buf[..n]);
        pending.extend_from_slice(&buf[..n]);
        while pending.len() >= chunk_size {
            leaves.push(merkle::hash_bytes(&pending[..chunk_size]));
            pending.drain(..chunk_size);
        }
    }
    if !pending.is_empty() {
        leaves.push(merkle::hash_bytes(&pending));
    }

    let root = merkle::merkle_root(&leaves);
    let merkle = MerkleCommitment {
        algorithm: MERKLE_ALGORITHM.to_string(),
        root: hex::encode(root),
        leaf_count: leaves.len() as u64,
        chunk_size: policy.chunk_size(),
    };
    Ok(Fingerprint {
        bytes: total,
        chunks: leaves.len() as u64,
        leaves,
        file_digests: FileDigests {
            blake2b_512: hex::encode(file_blake.finalize()),
            sha512: hex::encode(file_sha.finalize()),
        },
        merkle,
    })
}

/// Fingerprint a file on disk. The handle is opened read-only and released
/// at EOF or on the first error.
pub fn fingerprint_file<P: AsRef<Path>>(
    path: P,
    policy: ChunkPolicy,
) -> Result<Fingerprint, FingerprintError> {
    let file = File::open(path)?;
    fingerprint_reader(file, policy)
}
