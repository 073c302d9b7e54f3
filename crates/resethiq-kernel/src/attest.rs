//! Attestation assembler.
//!
//! Composes the manifest and signed claims for one artifact, signs the
//! canonical-JSON payload with Ed25519, samples inclusion proofs at fixed
//! quartile indices, and emits the bundle document. Two runs over the same
//! artifact with the same key and chunk size produce identical claims,
//! sampled proofs, and root; only the manifest's run id and timestamp differ.

use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha512};
use thiserror::Error;
use uuid::Uuid;

use crate::canonical::{self, CanonicalError};
use crate::fingerprint::{
    fingerprint_file, ChunkPolicy, FileDigests, Fingerprint, FingerprintError, MerkleCommitment,
    MERKLE_ALGORITHM,
};
use crate::keystore::KeyStore;
use crate::merkle::{self, ProofError};

/// Top-level bundle schema id.
pub const ATTESTATION_SCHEMA: &str = "resethiq.attestation.v1";
/// Schema id of the signature-covered claims.
pub const SIGNED_PAYLOAD_SCHEMA: &str = "resethiq.signed_payload.v1";
/// Proof-section type tag.
pub const PROOF_TYPE: &str = "merkle_inclusion_v1";
/// Identifier of the canonicalization rules the bundle commits to.
pub const CANONICALIZATION_SPEC_ID: &str = "cdr-stream-v1";
/// Signature algorithm tag.
pub const SIGNATURE_ALGORITHM: &str = "ed25519";

/// Engine identity recorded in manifests and receipts.
pub const ENGINE_NAME: &str = "resethiq-kernel";
/// Engine version recorded in manifests and receipts.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// File name of the bundle inside the output directory.
pub const BUNDLE_FILE: &str = "attestation.json";

#[derive(Debug, Error)]
pub enum AttestError {
    #[error("fingerprint: {0}")]
    Fingerprint(#[from] FingerprintError),
    #[error("canonicalization: {0}")]
    Canonical(#[from] CanonicalError),
    #[error("proof: {0}")]
    Proof(#[from] ProofError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("bundle encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Execution environment fingerprint, passed explicitly so tests can inject
/// fixed values and assert byte-identical manifests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvSnapshot {
    pub runtime: String,
    pub platform: String,
    pub arch: String,
}

impl EnvSnapshot {
    /// Snapshot of the running process.
    #[must_use]
    pub fn capture() -> Self {
        Self {
            runtime: concat!("rust-", env!("CARGO_PKG_RUST_VERSION")).to_string(),
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineIdentity {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    /// UUIDv4, fresh per run.
    pub id: String,
    /// RFC-3339 UTC timestamp.
    pub created_at: String,
}

/// What was attested: the artifact's name and size. No content, no PII.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub filename: String,
    pub byte_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub engine: EngineIdentity,
    pub run: RunInfo,
    pub subject: Subject,
    pub environment: EnvSnapshot,
}

/// The signature-covered claims. The signing target is the canonical JSON of
/// this structure, nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub schema: String,
    pub manifest_sha512: String,
    pub file_digests: FileDigests,
    pub merkle: MerkleCommitment,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalizationInfo {
    pub spec_id: String,
    pub description: String,
}

/// One sampled inclusion proof, persisted with its self-check result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampledProof {
    pub index: u64,
    pub leaf_hex: String,
    pub siblings_hex: Vec<String>,
    pub verifies: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofSection {
    #[serde(rename = "type")]
    pub proof_type: String,
    pub merkle_root: String,
    pub algorithm: String,
    pub sampled: Vec<SampledProof>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureBlock {
    pub algorithm: String,
    pub public_key_pem: String,
    pub signed_message_sha512: String,
    pub signature_b64: String,
}

/// The complete bundle document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub schema: String,
    pub manifest: Manifest,
    pub canonicalization: CanonicalizationInfo,
    pub claims: SignedPayload,
    pub proofs: ProofSection,
    pub signature: SignatureBlock,
}

/// Fixed sampling policy: first, quartiles, last; deduplicated and sorted.
/// Empty trees sample nothing.
#[must_use]
pub fn sample_indices(leaf_count: u64) -> Vec<u64> {
    if leaf_count == 0 {
        return Vec::new();
    }
    let n = leaf_count;
    let mut indices = vec![0, n / 4, n / 2, 3 * n / 4, n - 1];
    indices.sort_unstable();
    indices.dedup();
    indices
}

/// Fingerprint `artifact` and assemble the signed attestation for it.
pub fn build_attestation(
    artifact: &Path,
    policy: ChunkPolicy,
    keystore: &KeyStore,
    environment: EnvSnapshot,
) -> Result<(Attestation, Fingerprint), AttestError> {
    let fingerprint = fingerprint_file(artifact, policy)?;

    let filename = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| artifact.to_string_lossy().into_owned());
    let manifest = Manifest {
        engine: EngineIdentity {
            name: ENGINE_NAME.to_string(),
            version: ENGINE_VERSION.to_string(),
        },
        run: RunInfo {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        },
        subject: Subject {
            filename,
            byte_count: fingerprint.bytes,
        },
        environment,
    };

    let attestation = assemble(manifest, &fingerprint, keystore)?;
    Ok((attestation, fingerprint))
}

/// Assemble and sign the bundle for an already-computed fingerprint.
pub fn assemble(
    manifest: Manifest,
    fingerprint: &Fingerprint,
    keystore: &KeyStore,
) -> Result<Attestation, AttestError> {
    let manifest_sha512 = canonical::canonical_sha512_hex(&manifest)?;
    let claims = SignedPayload {
        schema: SIGNED_PAYLOAD_SCHEMA.to_string(),
        manifest_sha512,
        file_digests: fingerprint.file_digests.clone(),
        merkle: fingerprint.merkle.clone(),
    };

    let signed_message = canonical::canonical_json_of(&claims)?;
    let signed_message_sha512 = hex::encode(Sha512::digest(&signed_message));
    let signature = keystore.sign(&signed_message);

    let root = merkle::merkle_root(&fingerprint.leaves);
    let mut sampled = Vec::new();
    for index in sample_indices(fingerprint.merkle.leaf_count) {
        let proof = merkle::inclusion_proof(&fingerprint.leaves, index as usize)?;
        let verifies = merkle::verify_inclusion(&root, &proof);
        sampled.push(SampledProof {
            index,
            leaf_hex: hex::encode(proof.leaf_hash),
            siblings_hex: proof.siblings.iter().map(hex::encode).collect(),
            verifies,
        });
    }

    Ok(Attestation {
        schema: ATTESTATION_SCHEMA.to_string(),
        manifest,
        canonicalization: CanonicalizationInfo {
            spec_id: CANONICALIZATION_SPEC_ID.to_string(),
            description: "canonical JSON (sorted keys, no whitespace) for hashed structures; \
                          0x1f-joined fields for tabular records"
                .to_string(),
        },
        claims,
        proofs: ProofSection {
            proof_type: PROOF_TYPE.to_string(),
            merkle_root: fingerprint.merkle.root.clone(),
            algorithm: MERKLE_ALGORITHM.to_string(),
            sampled,
        },
        signature: SignatureBlock {
            algorithm: SIGNATURE_ALGORITHM.to_string(),
            public_key_pem: keystore.public_key_pem().to_string(),
            signed_message_sha512,
            signature_b64: BASE64.encode(signature.to_bytes()),
        },
    })
}

/// Write the bundle into `out_dir` as `attestation.json`.
///
/// The document lands via a temporary file and an atomic rename; an
/// abandoned write leaves nothing visible.
pub fn write_attestation(out_dir: &Path, attestation: &Attestation) -> Result<PathBuf, AttestError> {
    std::fs::create_dir_all(out_dir)?;
    let target = out_dir.join(BUNDLE_FILE);
    let mut tmp = tempfile::NamedTempFile::new_in(out_dir)?;
    serde_json::to_writer_pretty(&mut tmp, attestation)?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.persist(&target)
        .map_err(|e| AttestError::Io(e.error))?;
    Ok(target)
}

/// One-line summary printed after a successful attestation.
#[must_use]
pub fn summary_json(attestation: &Attestation, bundle_path: &Path) -> serde_json::Value {
    json!({
        "ok": true,
        "bundle": bundle_path.display().to_string(),
        "subject": attestation.manifest.subject,
        "merkle_root": attestation.claims.merkle.root,
        "leaf_count": attestation.claims.merkle.leaf_count,
        "run_id": attestation.manifest.run.id,
    })
}
