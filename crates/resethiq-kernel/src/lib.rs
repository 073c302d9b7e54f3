//! Cryptographic evidence kernel for the resethiq attestation engine.
//!
//! Given a byte-stream artifact, this crate produces a signed, independently
//! verifiable bundle proving what the bytes were, what structural
//! commitments were computed over them, and that the processing steps ran in
//! a tamper-evident chain. A third party holding only the bundle and the
//! artifact can recompute every hash, re-verify every inclusion proof, and
//! validate the signature offline.
//!
//! Components:
//! - [`canonical`]: deterministic record and JSON serialization feeding all
//!   hashes and signatures.
//! - [`fingerprint`]: one-pass streaming digests (dual file hashes + chunk
//!   leaves + Merkle commitment).
//! - [`merkle`]: root computation, inclusion proofs, proof verification.
//! - [`attest`]: manifest + signed claims assembly and bundle emission.
//! - [`receipt`] / [`transparency`]: hash-chained step receipts and the
//!   append-only transparency log.
//! - [`verify`]: the recompute-and-compare mirror of attestation.
//! - [`keystore`]: Ed25519 keypair persistence.

#![forbid(unsafe_code)]

pub mod attest;
pub mod canonical;
pub mod fingerprint;
pub mod keystore;
pub mod merkle;
pub mod receipt;
pub mod transparency;
pub mod verify;

pub use attest::{Attestation, AttestError, EnvSnapshot, Manifest, SignedPayload};
pub use canonical::{CanonicalError, Record};
pub use fingerprint::{
    ChunkPolicy, FileDigests, Fingerprint, FingerprintError, MerkleCommitment, DEFAULT_CHUNK_SIZE,
};
pub use keystore::{KeyStore, KeyStoreError};
pub use merkle::{InclusionProof, LeafHash, ProofError};
pub use receipt::{Receipt, ReceiptChain, ReceiptError};
pub use transparency::{LogError, TransparencyLog};
pub use verify::{VerificationReport, VerifyError};
