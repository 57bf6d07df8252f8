//! Opaque, tamper-evident pagination cursors
//!
//! A cursor is `base64(json).base64(hmac)`. The signer is constructed once at
//! startup and handed to whoever paginates; there is no process-global key.

use anyhow::{anyhow, Result};
use base64::prelude::*;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::storage::rows::{from_millis, to_millis};
use crate::storage::TestPageKey;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CursorData {
    created_at: i64,
    id: i64,
}

pub struct CursorSigner {
    key: Vec<u8>,
}

impl CursorSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: secret.to_vec(),
        }
    }

    /// Use the configured secret, or a random key that dies with the process
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret {
            Some(secret) => Self::new(secret.as_bytes()),
            None => {
                warn!("CURSOR_HMAC_SECRET is not set; cursors will not survive a restart");
                let key: [u8; 32] = rand::random();
                Self::new(&key)
            }
        }
    }

    fn mac(&self, payload: &str) -> Result<Hmac<Sha256>> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.key)
            .map_err(|e| anyhow!("Failed to create HMAC: {}", e))?;
        mac.update(payload.as_bytes());
        Ok(mac)
    }

    pub fn sign(&self, key: &TestPageKey) -> Result<String> {
        let data = CursorData {
            created_at: to_millis(key.created_at),
            id: key.id,
        };
        let json = serde_json::to_string(&data)?;
        let payload = BASE64_URL_SAFE_NO_PAD.encode(json.as_bytes());

        let signature = self.mac(&payload)?.finalize().into_bytes();
        Ok(format!(
            "{}.{}",
            payload,
            BASE64_URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    pub fn verify(&self, cursor: &str) -> Result<TestPageKey> {
        let (payload, signature_b64) = cursor
            .split_once('.')
            .filter(|(_, sig)| !sig.contains('.'))
            .ok_or_else(|| anyhow!("Invalid cursor format"))?;

        let provided = BASE64_URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| anyhow!("Invalid cursor signature encoding"))?;
        let expected = self.mac(payload)?.finalize().into_bytes();

        if !bool::from(expected.ct_eq(&provided[..])) {
            return Err(anyhow!("Cursor signature verification failed"));
        }

        let json = BASE64_URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| anyhow!("Invalid cursor payload encoding"))?;
        let data: CursorData =
            serde_json::from_slice(&json).map_err(|_| anyhow!("Invalid cursor data"))?;

        Ok(TestPageKey {
            created_at: from_millis(data.created_at)?,
            id: data.id,
        })
    }
}

/// Position key for the last test on a page
pub fn page_key(created_at: DateTime<Utc>, id: i64) -> TestPageKey {
    TestPageKey { created_at, id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn key() -> TestPageKey {
        page_key(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(), 42)
    }

    #[test]
    fn test_cursor_sign_and_verify() {
        let signer = CursorSigner::new(b"test_secret_key_for_hmac_signing");
        let cursor = signer.sign(&key()).unwrap();
        assert_eq!(signer.verify(&cursor).unwrap(), key());
    }

    #[test]
    fn test_cursor_tampering_detection() {
        let signer = CursorSigner::new(b"test_secret_key_for_hmac_signing");
        let cursor = signer.sign(&key()).unwrap();
        let (payload, _) = cursor.split_once('.').unwrap();

        assert!(signer.verify(&format!("{payload}.invalid_signature")).is_err());
    }

    #[test]
    fn test_cursor_from_other_key_rejected() {
        let cursor = CursorSigner::new(b"one").sign(&key()).unwrap();
        assert!(CursorSigner::new(b"two").verify(&cursor).is_err());
    }

    #[test]
    fn test_cursor_invalid_format() {
        let signer = CursorSigner::from_secret(None);
        assert!(signer.verify("invalid").is_err());
        assert!(signer.verify("invalid.format.extra").is_err());
    }
}
