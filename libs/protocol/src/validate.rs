use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

/// A Curve25519 public key is always exactly 32 bytes.
pub const PUBLIC_KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("`id` must not be empty")]
    EmptyId,
    #[error("`wg_public_key` is not valid base64: {0}")]
    NotBase64(String),
    #[error("`wg_public_key` must decode to {PUBLIC_KEY_LEN} bytes, got {0}")]
    WrongKeyLength(usize),
    #[error("`endpoint_port` must be in 1..=65535, got {0}")]
    PortOutOfRange(u16),
}

/// Decodes and length-checks a base64-encoded WireGuard public key.
pub fn validate_public_key(encoded: &str) -> Result<[u8; PUBLIC_KEY_LEN], ValidationError> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| ValidationError::NotBase64(e.to_string()))?;

    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| ValidationError::WrongKeyLength(len))
}

pub fn validate_endpoint_port(port: u16) -> Result<(), ValidationError> {
    if port == 0 {
        return Err(ValidationError::PortOutOfRange(port));
    }
    Ok(())
}

pub fn validate_id(id: &str) -> Result<(), ValidationError> {
    if id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_id() {
        assert_eq!(validate_id(""), Err(ValidationError::EmptyId));
        assert_eq!(validate_id("   "), Err(ValidationError::EmptyId));
    }

    #[test]
    fn accepts_valid_key() {
        let key = [7u8; PUBLIC_KEY_LEN];
        let encoded = BASE64.encode(key);
        assert_eq!(validate_public_key(&encoded), Ok(key));
    }

    #[test]
    fn rejects_non_base64_key() {
        assert!(matches!(
            validate_public_key("not-base64!!"),
            Err(ValidationError::NotBase64(_))
        ));
    }

    #[test]
    fn rejects_wrong_length_key() {
        let encoded = BASE64.encode([1u8; 16]);
        assert_eq!(
            validate_public_key(&encoded),
            Err(ValidationError::WrongKeyLength(16))
        );
    }

    #[test]
    fn rejects_zero_port() {
        assert_eq!(
            validate_endpoint_port(0),
            Err(ValidationError::PortOutOfRange(0))
        );
        assert_eq!(validate_endpoint_port(1), Ok(()));
        assert_eq!(validate_endpoint_port(65535), Ok(()));
    }
}
