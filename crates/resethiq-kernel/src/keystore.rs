//! Ed25519 key store.
//!
//! `load_or_create` is the only entry point: it either loads an existing
//! SPKI/PKCS#8 PEM pair from the configured directory or generates and
//! persists a fresh one. First creation is guarded by an exclusive file lock
//! so two concurrent cold-starts cannot generate and clobber different
//! keypairs. Once written, key files are never rewritten.

use std::fs::OpenOptions;
use std::path::Path;

use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::spki::{DecodePublicKey, EncodePublicKey};
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use fs2::FileExt;
use rand::rngs::OsRng;
use thiserror::Error;

/// SPKI PEM, world-readable.
pub const PUBLIC_KEY_FILE: &str = "ed25519_public.pem";
/// PKCS#8 PEM, owner read/write only where the platform supports it.
pub const PRIVATE_KEY_FILE: &str = "ed25519_private.pem";

const LOCK_FILE: &str = ".keystore.lock";

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("key material: {0}")]
    KeyMaterial(String),
    #[error("key pair is inconsistent: {missing} is missing while its counterpart exists")]
    Inconsistent { missing: &'static str },
}

/// A loaded signing identity.
pub struct KeyStore {
    signing_key: SigningKey,
    public_key_pem: String,
}

impl KeyStore {
    /// Load the keypair from `dir`, generating and persisting one if the
    /// directory holds none.
    pub fn load_or_create<P: AsRef<Path>>(dir: P) -> Result<Self, KeyStoreError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let lock = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(dir.join(LOCK_FILE))?;
        lock.lock_exclusive()?;
        let result = Self::load_or_create_locked(dir);
        // Lock is released when `lock` drops, error path included.
        drop(lock);
        result
    }

    fn load_or_create_locked(dir: &Path) -> Result<Self, KeyStoreError> {
        let public_path = dir.join(PUBLIC_KEY_FILE);
        let private_path = dir.join(PRIVATE_KEY_FILE);
        match (public_path.exists(), private_path.exists()) {
            (true, true) => Self::load(&public_path, &private_path),
            (false, false) => Self::generate(&public_path, &private_path),
            (true, false) => Err(KeyStoreError::Inconsistent {
                missing: PRIVATE_KEY_FILE,
            }),
            (false, true) => Err(KeyStoreError::Inconsistent {
                missing: PUBLIC_KEY_FILE,
            }),
        }
    }

    fn load(public_path: &Path, private_path: &Path) -> Result<Self, KeyStoreError> {
        let private_pem = std::fs::read_to_string(private_path)?;
        let public_key_pem = std::fs::read_to_string(public_path)?;
        let signing_key = SigningKey::from_pkcs8_pem(&private_pem)
            .map_err(|e| KeyStoreError::KeyMaterial(format!("private key: {e}")))?;
        let stored_public = VerifyingKey::from_public_key_pem(&public_key_pem)
            .map_err(|e| KeyStoreError::KeyMaterial(format!("public key: {e}")))?;
        if stored_public != signing_key.verifying_key() {
            return Err(KeyStoreError::KeyMaterial(
                "public key does not match private key".to_string(),
            ));
        }
        Ok(Self {
            signing_key,
            public_key_pem,
        })
    }

    fn generate(public_path: &Path, private_path: &Path) -> Result<Self, KeyStoreError> {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let private_pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| KeyStoreError::KeyMaterial(format!("private key encoding: {e}")))?;
        let public_key_pem = signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| KeyStoreError::KeyMaterial(format!("public key encoding: {e}")))?;

        write_private_key(private_path, private_pem.as_bytes())?;
        std::fs::write(public_path, public_key_pem.as_bytes())?;
        Ok(Self {
            signing_key,
            public_key_pem,
        })
    }

    /// Sign a message with the stored private key.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// The SPKI PEM block exactly as persisted on disk.
    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }
}

#[cfg(unix)]
fn write_private_key(path: &Path, bytes: &[u8]) -> Result<(), KeyStoreError> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private_key(path: &Path, bytes: &[u8]) -> Result<(), KeyStoreError> {
    std::fs::write(path, bytes)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::Verifier;

    #[test]
    fn generates_then_reloads_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let first = KeyStore::load_or_create(dir.path()).unwrap();
        let second = KeyStore::load_or_create(dir.path()).unwrap();
        assert_eq!(first.public_key_pem(), second.public_key_pem());
        assert_eq!(first.verifying_key(), second.verifying_key());
        assert!(dir.path().join(PUBLIC_KEY_FILE).exists());
        assert!(dir.path().join(PRIVATE_KEY_FILE).exists());
    }

    #[test]
    fn signatures_verify_against_the_public_pem() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::load_or_create(dir.path()).unwrap();
        let message = b"attestation payload bytes";
        let signature = store.sign(message);
        let public = VerifyingKey::from_public_key_pem(store.public_key_pem()).unwrap();
        assert!(public.verify(message, &signature).is_ok());
    }

    #[test]
    fn half_present_pair_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let _ = KeyStore::load_or_create(dir.path()).unwrap();
        std::fs::remove_file(dir.path().join(PRIVATE_KEY_FILE)).unwrap();
        let err = match KeyStore::load_or_create(dir.path()) {
            Ok(_) => panic!("half-present pair should be rejected"),
            Err(err) => err,
        };
        assert!(matches!(
            err,
            KeyStoreError::Inconsistent {
                missing: PRIVATE_KEY_FILE
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn private_key_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let _ = KeyStore::load_or_create(dir.path()).unwrap();
        let mode = std::fs::metadata(dir.path().join(PRIVATE_KEY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
