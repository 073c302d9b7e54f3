//! Offline bundle verification.
//!
//! Mirrors the assembler: re-fingerprints the artifact with the bundle's own
//! chunk size, recomputes every digest and the Merkle root, recomputes the
//! signed message from the deserialized claims through the canonical
//! serializer, and validates the Ed25519 signature. Every comparison lands in
//! a per-check boolean; a mismatch is a first-class result, never an error.
//! Tampered signature material (bad base64, wrong length, unparseable PEM)
//! also reports `signature_valid = false` rather than failing operationally.

use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::pkcs8::spki::DecodePublicKey;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Serialize;
use sha2::{Digest, Sha512};
use thiserror::Error;

use crate::attest::Attestation;
use crate::canonical::{self, CanonicalError};
use crate::fingerprint::{fingerprint_file, ChunkPolicy, Fingerprint, FingerprintError};
use crate::merkle::{self, InclusionProof, LeafHash};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("bundle decoding: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("fingerprint: {0}")]
    Fingerprint(#[from] FingerprintError),
    #[error("canonicalization: {0}")]
    Canonical(#[from] CanonicalError),
}

/// Digest view used for the expected/actual halves of the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DigestView {
    pub blake2b_512: String,
    pub sha512: String,
    pub merkle_root: String,
    pub leaf_count: u64,
}

/// Per-check booleans. `ok` on the report is their conjunction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationChecks {
    pub file_blake2b_match: bool,
    pub file_sha512_match: bool,
    pub merkle_root_match: bool,
    pub leaf_count_match: bool,
    pub signed_message_sha512_match: bool,
    pub signature_valid: bool,
    pub sampled_proofs_valid: bool,
}

impl VerificationChecks {
    #[must_use]
    pub fn all(&self) -> bool {
        self.file_blake2b_match
            && self.file_sha512_match
            && self.merkle_root_match
            && self.leaf_count_match
            && self.signed_message_sha512_match
            && self.signature_valid
            && self.sampled_proofs_valid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerificationReport {
    pub ok: bool,
    pub bytes_read: u64,
    pub expected: DigestView,
    pub actual: DigestView,
    pub checks: VerificationChecks,
}

/// Load a bundle document from disk.
pub fn load_bundle(path: &Path) -> Result<Attestation, VerifyError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Verify `bundle` against the artifact at `artifact`.
pub fn verify_bundle(bundle: &Attestation, artifact: &Path) -> Result<VerificationReport, VerifyError> {
    let policy = ChunkPolicy::new(bundle.claims.merkle.chunk_size)?;
    let fingerprint = fingerprint_file(artifact, policy)?;
    Ok(compare(bundle, &fingerprint)?)
}

/// Compare claims against an already-computed fingerprint.
pub fn compare(
    bundle: &Attestation,
    fingerprint: &Fingerprint,
) -> Result<VerificationReport, CanonicalError> {
    let claims = &bundle.claims;

    let signed_message = canonical::canonical_json_of(claims)?;
    let signed_message_sha512 = hex::encode(Sha512::digest(&signed_message));

    let checks = VerificationChecks {
        file_blake2b_match: claims.file_digests.blake2b_512 == fingerprint.file_digests.blake2b_512,
        file_sha512_match: claims.file_digests.sha512 == fingerprint.file_digests.sha512,
        merkle_root_match: claims.merkle.root == fingerprint.merkle.root,
        leaf_count_match: claims.merkle.leaf_count == fingerprint.merkle.leaf_count,
        signed_message_sha512_match: signed_message_sha512
            == bundle.signature.signed_message_sha512,
        signature_valid: signature_valid(bundle, &signed_message),
        sampled_proofs_valid: sampled_proofs_valid(bundle),
    };

    Ok(VerificationReport {
        ok: checks.all(),
        bytes_read: fingerprint.bytes,
        expected: DigestView {
            blake2b_512: claims.file_digests.blake2b_512.clone(),
            sha512: claims.file_digests.sha512.clone(),
            merkle_root: claims.merkle.root.clone(),
            leaf_count: claims.merkle.leaf_count,
        },
        actual: DigestView {
            blake2b_512: fingerprint.file_digests.blake2b_512.clone(),
            sha512: fingerprint.file_digests.sha512.clone(),
            merkle_root: fingerprint.merkle.root.clone(),
            leaf_count: fingerprint.merkle.leaf_count,
        },
        checks,
    })
}

fn signature_valid(bundle: &Attestation, signed_message: &[u8]) -> bool {
    let Ok(public_key) = VerifyingKey::from_public_key_pem(&bundle.signature.public_key_pem)
    else {
        return false;
    };
    let Ok(raw) = BASE64.decode(&bundle.signature.signature_b64) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&raw) else {
        return false;
    };
    public_key.verify(signed_message, &signature).is_ok()
}

fn decode_leaf(hex_str: &str) -> Option<LeafHash> {
    let raw = hex::decode(hex_str).ok()?;
    raw.try_into().ok()
}

fn sampled_proofs_valid(bundle: &Attestation) -> bool {
    let Some(root) = decode_leaf(&bundle.claims.merkle.root) else {
        return false;
    };
    if bundle.proofs.merkle_root != bundle.claims.merkle.root {
        return false;
    }
    if bundle.claims.merkle.leaf_count == 0 {
        // Nothing to sample from an empty tree.
        return bundle.proofs.sampled.is_empty();
    }
    bundle.proofs.sampled.iter().all(|sample| {
        let Some(leaf_hash) = decode_leaf(&sample.leaf_hex) else {
            return false;
        };
        let siblings: Option<Vec<LeafHash>> =
            sample.siblings_hex.iter().map(|s| decode_leaf(s)).collect();
        let Some(siblings) = siblings else {
            return false;
        };
        let proof = InclusionProof {
            index: sample.index as usize,
            leaf_hash,
            siblings,
        };
        merkle::verify_inclusion(&root, &proof)
    })
}
