//! Private key provisioning for the node.
//!
//! Loads the node's Curve25519 private key from disk if present, otherwise
//! generates one and persists it — the same atomic create-or-load shape the
//! teacher's `device_id` module uses for its UUID file, specialized for key
//! material with owner-only permissions.

use std::fs;
use std::io;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;
use x25519_dalek::{PublicKey, StaticSecret};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read private key file at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write private key file at {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("private key file at {path} does not contain valid base64: {source}")]
    Decode {
        path: String,
        #[source]
        source: base64::DecodeError,
    },
    #[error("private key file at {path} does not contain exactly 32 bytes (got {len})")]
    WrongLength { path: String, len: usize },
    #[error("failed to set owner-only permissions on {path}: {source}")]
    Permissions {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// The node's Curve25519 keypair, derived once and held for the process lifetime.
#[derive(Clone)]
pub struct NodeKeyPair {
    secret: StaticSecret,
}

impl NodeKeyPair {
    /// Loads the private key from `path`, creating and persisting a freshly
    /// generated one if the file doesn't exist yet.
    pub fn load_or_generate(path: &Path) -> Result<Self, KeyError> {
        match fs::read_to_string(path) {
            Ok(contents) => Self::decode(path, &contents),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let pair = Self::generate();
                pair.persist(path)?;
                Ok(pair)
            }
            Err(source) => Err(KeyError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    fn generate() -> Self {
        // `StaticSecret::random` clamps the scalar internally.
        Self {
            secret: StaticSecret::random(),
        }
    }

    fn decode(path: &Path, encoded: &str) -> Result<Self, KeyError> {
        let path_str = path.display().to_string();
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|source| KeyError::Decode {
                path: path_str.clone(),
                source,
            })?;

        let len = bytes.len();
        let array: [u8; 32] = bytes.try_into().map_err(|_| KeyError::WrongLength {
            path: path_str,
            len,
        })?;

        Ok(Self {
            secret: StaticSecret::from(array),
        })
    }

    fn persist(&self, path: &Path) -> Result<(), KeyError> {
        let encoded = BASE64.encode(self.secret.to_bytes());

        fs::write(path, encoded).map_err(|source| KeyError::Write {
            path: path.display().to_string(),
            source,
        })?;

        set_owner_only(path)?;
        Ok(())
    }

    /// The 32-byte clamped scalar, as stored on disk.
    pub fn private_key_bytes(&self) -> [u8; 32] {
        self.secret.to_bytes()
    }

    /// The public key, derived by scalar-base multiplication.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }

    /// The public key, base64-encoded, suitable for registration.
    pub fn public_key_base64(&self) -> String {
        BASE64.encode(self.public_key().to_bytes())
    }
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> Result<(), KeyError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|source| {
        KeyError::Permissions {
            path: path.display().to_string(),
            source,
        }
    })
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> Result<(), KeyError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generates_and_persists_on_first_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("private_key");

        let pair = NodeKeyPair::load_or_generate(&path).unwrap();
        assert!(path.exists());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o600);
        }

        // Second load must reuse the same key, not regenerate.
        let reloaded = NodeKeyPair::load_or_generate(&path).unwrap();
        assert_eq!(pair.private_key_bytes(), reloaded.private_key_bytes());
    }

    #[test]
    fn public_key_is_consistent_scalar_base_mult() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("private_key");
        let pair = NodeKeyPair::load_or_generate(&path).unwrap();

        let rederived = StaticSecret::from(pair.private_key_bytes());
        assert_eq!(
            PublicKey::from(&rederived).to_bytes(),
            pair.public_key().to_bytes()
        );
    }

    #[test]
    fn rejects_corrupt_key_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("private_key");
        fs::write(&path, "not-base64!!").unwrap();

        assert!(matches!(
            NodeKeyPair::load_or_generate(&path),
            Err(KeyError::Decode { .. })
        ));
    }

    #[test]
    fn rejects_wrong_length_key_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("private_key");
        fs::write(&path, BASE64.encode([1u8; 16])).unwrap();

        assert!(matches!(
            NodeKeyPair::load_or_generate(&path),
            Err(KeyError::WrongLength { len: 16, .. })
        ));
    }
}
