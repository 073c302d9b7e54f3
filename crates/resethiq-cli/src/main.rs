//! CLI entrypoint for the resethiq evidence kernel.
//!
//! Exit codes are part of the contract: 0 success, 1 usage or configuration
//! error, 2 operational error, 3 verification mismatch. A failed verification
//! is a result, not an error, so it prints its report and exits 3.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde_json::json;

use resethiq_kernel::attest::{self, EnvSnapshot};
use resethiq_kernel::fingerprint::{fingerprint_file, ChunkPolicy, DEFAULT_CHUNK_SIZE};
use resethiq_kernel::keystore::KeyStore;
use resethiq_kernel::receipt::Receipt;
use resethiq_kernel::transparency::TransparencyLog;
use resethiq_kernel::verify;

const EXIT_OK: i32 = 0;
const EXIT_USAGE: i32 = 1;
const EXIT_ERROR: i32 = 2;
const EXIT_MISMATCH: i32 = 3;

/// Evidence-grade integrity attestations for data artifacts.
#[derive(Debug, Parser)]
#[command(name = "resethiq")]
#[command(about = "Streaming fingerprints, Merkle commitments, signed attestation bundles")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fingerprint a file and print its digests and Merkle commitment.
    Hash {
        /// Artifact to fingerprint.
        file: PathBuf,
        /// Chunk size in bytes partitioning the stream into leaves.
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk: u64,
    },
    /// Produce a signed attestation bundle for a file.
    Attest {
        /// Artifact to attest.
        file: PathBuf,
        /// Chunk size in bytes partitioning the stream into leaves.
        #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk: u64,
        /// Output directory for the bundle, receipt, and transparency log.
        #[arg(long, default_value = "out")]
        out: PathBuf,
        /// Key store directory.
        #[arg(long, default_value = "keys")]
        keys: PathBuf,
    },
    /// Verify a bundle against the original artifact.
    Verify {
        /// Bundle JSON path.
        #[arg(long)]
        bundle: PathBuf,
        /// Artifact path.
        #[arg(long)]
        file: PathBuf,
    },
    /// Replay a transparency log from GENESIS and check every entry hash.
    LogVerify {
        /// Transparency log path.
        #[arg(long)]
        log: PathBuf,
    },
    /// Create the Ed25519 keypair if absent and print the public key.
    Keygen {
        /// Key store directory.
        #[arg(long, default_value = "keys")]
        keys: PathBuf,
    },
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() { EXIT_USAGE } else { EXIT_OK };
            let _ = err.print();
            std::process::exit(code);
        }
    };
    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    match cli.command {
        Command::Hash { file, chunk } => cmd_hash(&file, chunk),
        Command::Attest {
            file,
            chunk,
            out,
            keys,
        } => cmd_attest(&file, chunk, &out, &keys),
        Command::Verify { bundle, file } => cmd_verify(&bundle, &file),
        Command::LogVerify { log } => cmd_log_verify(&log),
        Command::Keygen { keys } => cmd_keygen(&keys),
    }
}

fn usage_error(message: impl std::fmt::Display) -> i32 {
    eprintln!("error: {message}");
    EXIT_USAGE
}

fn operational_error(message: impl std::fmt::Display) -> i32 {
    eprintln!("error: {message}");
    EXIT_ERROR
}

fn require_file(path: &Path) -> Option<i32> {
    if path.exists() {
        None
    } else {
        Some(usage_error(format_args!("no such file: {}", path.display())))
    }
}

fn cmd_hash(file: &Path, chunk: u64) -> i32 {
    let policy = match ChunkPolicy::new(chunk) {
        Ok(policy) => policy,
        Err(err) => return usage_error(err),
    };
    if let Some(code) = require_file(file) {
        return code;
    }
    let fingerprint = match fingerprint_file(file, policy) {
        Ok(fingerprint) => fingerprint,
        Err(err) => return operational_error(err),
    };
    let output = json!({
        "file": file.display().to_string(),
        "bytes": fingerprint.bytes,
        "chunks_count": fingerprint.chunks,
        "leaf_hexes": fingerprint.leaves.iter().map(hex::encode).collect::<Vec<String>>(),
        "file_digests": fingerprint.file_digests,
        "merkle": fingerprint.merkle,
    });
    println!("{output}");
    EXIT_OK
}

fn cmd_attest(file: &Path, chunk: u64, out: &Path, keys: &Path) -> i32 {
    let policy = match ChunkPolicy::new(chunk) {
        Ok(policy) => policy,
        Err(err) => return usage_error(err),
    };
    if let Some(code) = require_file(file) {
        return code;
    }
    let keystore = match KeyStore::load_or_create(keys) {
        Ok(keystore) => keystore,
        Err(err) => return operational_error(err),
    };

    let environment = EnvSnapshot::capture();
    let (attestation, fingerprint) =
        match attest::build_attestation(file, policy, &keystore, environment.clone()) {
            Ok(built) => built,
            Err(err) => return operational_error(err),
        };
    let bundle_path = match attest::write_attestation(out, &attestation) {
        Ok(path) => path,
        Err(err) => return operational_error(err),
    };

    let receipt = match Receipt::build(
        "attest",
        json!({
            "file": file.display().to_string(),
            "bytes": fingerprint.bytes,
            "file_digests": fingerprint.file_digests,
        }),
        json!({ "chunk_size": chunk }),
        json!({
            "bundle": attest::BUNDLE_FILE,
            "merkle_root": fingerprint.merkle.root,
            "leaf_count": fingerprint.merkle.leaf_count,
        }),
        environment,
        None,
    ) {
        Ok(receipt) => receipt,
        Err(err) => return operational_error(err),
    };
    if let Err(err) = receipt.write_to(out) {
        return operational_error(err);
    }

    let log = TransparencyLog::open(out.join("transparency.log"));
    let entry = match log.append(&receipt.receipt_hash) {
        Ok(entry) => entry,
        Err(err) => return operational_error(err),
    };

    let mut summary = attest::summary_json(&attestation, &bundle_path);
    if let Some(fields) = summary.as_object_mut() {
        fields.insert("receipt_hash".to_string(), json!(receipt.receipt_hash));
        fields.insert("log_entry_hash".to_string(), json!(entry.entry_hash));
    }
    println!("{summary}");
    EXIT_OK
}

fn cmd_verify(bundle_path: &Path, file: &Path) -> i32 {
    if let Some(code) = require_file(bundle_path) {
        return code;
    }
    if let Some(code) = require_file(file) {
        return code;
    }
    let bundle = match verify::load_bundle(bundle_path) {
        Ok(bundle) => bundle,
        Err(err) => return operational_error(err),
    };
    let report = match verify::verify_bundle(&bundle, file) {
        Ok(report) => report,
        Err(err) => return operational_error(err),
    };
    match serde_json::to_string_pretty(&report) {
        Ok(body) => println!("{body}"),
        Err(err) => return operational_error(err),
    }
    if report.ok {
        EXIT_OK
    } else {
        EXIT_MISMATCH
    }
}

fn cmd_log_verify(log_path: &Path) -> i32 {
    if let Some(code) = require_file(log_path) {
        return code;
    }
    let log = TransparencyLog::open(log_path);
    let report = match log.verify() {
        Ok(report) => report,
        Err(err) => return operational_error(err),
    };
    match serde_json::to_string(&report) {
        Ok(body) => println!("{body}"),
        Err(err) => return operational_error(err),
    }
    if report.ok {
        EXIT_OK
    } else {
        EXIT_MISMATCH
    }
}

fn cmd_keygen(keys: &Path) -> i32 {
    let keystore = match KeyStore::load_or_create(keys) {
        Ok(keystore) => keystore,
        Err(err) => return operational_error(err),
    };
    print!("{}", keystore.public_key_pem());
    EXIT_OK
}
