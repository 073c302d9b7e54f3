//! Integration tests: attest → verify round trips.
//!
//! Covers:
//! 1. A bundle verifies against the artifact it was built from.
//! 2. A different artifact, or a single flipped byte, fails the digest and
//!    root checks.
//! 3. Tampered signature material flips only `signature_valid`.
//! 4. Empty and single-chunk artifacts hit their boundary behaviors.
//! 5. Claims and sampled proofs are deterministic across runs.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use resethiq_kernel::attest::{self, EnvSnapshot};
use resethiq_kernel::fingerprint::ChunkPolicy;
use resethiq_kernel::keystore::KeyStore;
use resethiq_kernel::merkle;
use resethiq_kernel::verify::{load_bundle, verify_bundle};

fn unique_tmp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after UNIX_EPOCH")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn pseudo_random_bytes(len: usize, mut state: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        out.push((state >> 33) as u8);
    }
    out
}

fn write_artifact(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).expect("write artifact");
    path
}

fn chunk(size: u64) -> ChunkPolicy {
    ChunkPolicy::new(size).expect("positive chunk size")
}

#[test]
fn bundle_round_trips_against_the_original_artifact() {
    let dir = unique_tmp_dir("attest-roundtrip");
    let artifact = write_artifact(&dir, "data.bin", &pseudo_random_bytes(100_000, 7));
    let keystore = KeyStore::load_or_create(dir.join("keys")).expect("keystore");

    let (attestation, fingerprint) =
        attest::build_attestation(&artifact, chunk(4096), &keystore, EnvSnapshot::capture())
            .expect("attest");
    assert_eq!(fingerprint.merkle.leaf_count, 25);
    assert!(attestation.proofs.sampled.iter().all(|s| s.verifies));

    let bundle_path = attest::write_attestation(&dir.join("out"), &attestation).expect("write");
    let bundle = load_bundle(&bundle_path).expect("load bundle");
    let report = verify_bundle(&bundle, &artifact).expect("verify");

    assert!(report.ok, "round trip should verify: {report:?}");
    assert_eq!(report.bytes_read, 100_000);
    assert_eq!(report.expected, report.actual);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn bundle_rejects_a_different_artifact() {
    let dir = unique_tmp_dir("attest-wrong-artifact");
    let artifact = write_artifact(&dir, "data.bin", &pseudo_random_bytes(50_000, 11));
    let other = write_artifact(&dir, "other.bin", &pseudo_random_bytes(50_000, 13));
    let keystore = KeyStore::load_or_create(dir.join("keys")).expect("keystore");

    let (attestation, _) =
        attest::build_attestation(&artifact, chunk(4096), &keystore, EnvSnapshot::capture())
            .expect("attest");
    let report = verify_bundle(&attestation, &other).expect("verify");

    assert!(!report.ok);
    assert!(!report.checks.file_blake2b_match);
    assert!(!report.checks.file_sha512_match);
    assert!(!report.checks.merkle_root_match);
    // The signature still covers the claims as stated.
    assert!(report.checks.signature_valid);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn single_byte_flip_breaks_digests_and_root() {
    let dir = unique_tmp_dir("attest-mutation");
    let mut data = pseudo_random_bytes(40_000, 17);
    let artifact = write_artifact(&dir, "data.bin", &data);
    let keystore = KeyStore::load_or_create(dir.join("keys")).expect("keystore");

    let (attestation, _) =
        attest::build_attestation(&artifact, chunk(4096), &keystore, EnvSnapshot::capture())
            .expect("attest");

    data[12_345] ^= 0x01;
    std::fs::write(&artifact, &data).expect("mutate artifact");
    let report = verify_bundle(&attestation, &artifact).expect("verify");

    assert!(!report.ok);
    assert!(!report.checks.file_blake2b_match);
    assert!(!report.checks.file_sha512_match);
    assert!(!report.checks.merkle_root_match);
    assert!(report.checks.leaf_count_match);
    assert!(report.checks.signed_message_sha512_match);
    assert!(report.checks.signature_valid);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn tampered_signature_reports_invalid_signature() {
    let dir = unique_tmp_dir("attest-bad-signature");
    let artifact = write_artifact(&dir, "data.bin", &pseudo_random_bytes(20_000, 19));
    let keystore = KeyStore::load_or_create(dir.join("keys")).expect("keystore");

    let (mut attestation, _) =
        attest::build_attestation(&artifact, chunk(4096), &keystore, EnvSnapshot::capture())
            .expect("attest");

    // Flip one base64 character of the signature.
    let mut chars: Vec<char> = attestation.signature.signature_b64.chars().collect();
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    attestation.signature.signature_b64 = chars.into_iter().collect();

    let report = verify_bundle(&attestation, &artifact).expect("verify");
    assert!(!report.ok);
    assert!(!report.checks.signature_valid);
    assert!(report.checks.file_blake2b_match);
    assert!(report.checks.file_sha512_match);
    assert!(report.checks.merkle_root_match);
    assert!(report.checks.signed_message_sha512_match);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn empty_artifact_round_trips_with_the_sentinel_root() {
    let dir = unique_tmp_dir("attest-empty");
    let artifact = write_artifact(&dir, "empty.bin", b"");
    let keystore = KeyStore::load_or_create(dir.join("keys")).expect("keystore");

    let (attestation, fingerprint) =
        attest::build_attestation(&artifact, chunk(4096), &keystore, EnvSnapshot::capture())
            .expect("attest");
    assert_eq!(fingerprint.merkle.leaf_count, 0);
    assert_eq!(attestation.claims.merkle.root, hex::encode(merkle::empty_root()));
    assert!(attestation.proofs.sampled.is_empty());

    let report = verify_bundle(&attestation, &artifact).expect("verify");
    assert!(report.ok, "empty artifact should verify: {report:?}");

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn exact_single_chunk_root_is_the_leaf_hash() {
    let dir = unique_tmp_dir("attest-single-chunk");
    let data = vec![0u8; 4096];
    let artifact = write_artifact(&dir, "zeros.bin", &data);
    let keystore = KeyStore::load_or_create(dir.join("keys")).expect("keystore");

    let (attestation, fingerprint) =
        attest::build_attestation(&artifact, chunk(4096), &keystore, EnvSnapshot::capture())
            .expect("attest");
    assert_eq!(fingerprint.merkle.leaf_count, 1);
    assert_eq!(
        attestation.claims.merkle.root,
        hex::encode(merkle::hash_bytes(&data))
    );

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn three_leaf_attestation_exercises_the_duplication_branch() {
    let dir = unique_tmp_dir("attest-three-leaves");
    let artifact = write_artifact(&dir, "data.bin", &pseudo_random_bytes(9_000, 23));
    let keystore = KeyStore::load_or_create(dir.join("keys")).expect("keystore");

    let (attestation, fingerprint) =
        attest::build_attestation(&artifact, chunk(4_000), &keystore, EnvSnapshot::capture())
            .expect("attest");
    assert_eq!(fingerprint.merkle.leaf_count, 3);

    let indices: Vec<u64> = attestation.proofs.sampled.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert!(attestation.proofs.sampled.iter().all(|s| s.verifies));

    let report = verify_bundle(&attestation, &artifact).expect("verify");
    assert!(report.ok);
    assert!(report.checks.sampled_proofs_valid);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn hundred_leaf_sampling_hits_the_quartiles() {
    let dir = unique_tmp_dir("attest-hundred-leaves");
    let artifact = write_artifact(&dir, "data.bin", &pseudo_random_bytes(100 * 512, 29));
    let keystore = KeyStore::load_or_create(dir.join("keys")).expect("keystore");

    let (attestation, fingerprint) =
        attest::build_attestation(&artifact, chunk(512), &keystore, EnvSnapshot::capture())
            .expect("attest");
    assert_eq!(fingerprint.merkle.leaf_count, 100);

    let indices: Vec<u64> = attestation.proofs.sampled.iter().map(|s| s.index).collect();
    assert_eq!(indices, vec![0, 25, 50, 75, 99]);
    assert!(attestation.proofs.sampled.iter().all(|s| s.verifies));

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn claims_and_sampled_proofs_are_deterministic_across_runs() {
    let dir = unique_tmp_dir("attest-determinism");
    let artifact = write_artifact(&dir, "data.bin", &pseudo_random_bytes(30_000, 31));
    let keystore = KeyStore::load_or_create(dir.join("keys")).expect("keystore");

    let (first, _) =
        attest::build_attestation(&artifact, chunk(4096), &keystore, EnvSnapshot::capture())
            .expect("attest");
    let (second, _) =
        attest::build_attestation(&artifact, chunk(4096), &keystore, EnvSnapshot::capture())
            .expect("attest");

    // Run id and timestamp differ; every content-derived field agrees.
    assert_ne!(first.manifest.run.id, second.manifest.run.id);
    assert_eq!(first.claims.file_digests, second.claims.file_digests);
    assert_eq!(first.claims.merkle, second.claims.merkle);
    assert_eq!(first.proofs.merkle_root, second.proofs.merkle_root);
    assert_eq!(first.proofs.sampled, second.proofs.sampled);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn identical_manifests_sign_identically() {
    let dir = unique_tmp_dir("attest-fixed-manifest");
    let artifact = write_artifact(&dir, "data.bin", &pseudo_random_bytes(10_000, 37));
    let keystore = KeyStore::load_or_create(dir.join("keys")).expect("keystore");

    let fingerprint = resethiq_kernel::fingerprint::fingerprint_file(&artifact, chunk(4096))
        .expect("fingerprint");
    let manifest = attest::Manifest {
        engine: attest::EngineIdentity {
            name: attest::ENGINE_NAME.to_string(),
            version: attest::ENGINE_VERSION.to_string(),
        },
        run: attest::RunInfo {
            id: "00000000-0000-4000-8000-000000000000".to_string(),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
        },
        subject: attest::Subject {
            filename: "data.bin".to_string(),
            byte_count: fingerprint.bytes,
        },
        environment: EnvSnapshot {
            runtime: "rust-test".to_string(),
            platform: "test-os".to_string(),
            arch: "test-arch".to_string(),
        },
    };

    let first = attest::assemble(manifest.clone(), &fingerprint, &keystore).expect("assemble");
    let second = attest::assemble(manifest, &fingerprint, &keystore).expect("assemble");
    assert_eq!(first, second);

    let _ = std::fs::remove_dir_all(dir);
}
