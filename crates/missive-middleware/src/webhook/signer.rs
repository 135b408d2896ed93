//! Webhook payload signing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs a serialized webhook payload.
pub trait Signer: Send + Sync + 'static {
    fn sign(&self, payload: &str) -> String;
}

impl<F> Signer for F
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    fn sign(&self, payload: &str) -> String {
        self(payload)
    }
}

/// Hex-encoded HMAC-SHA256 of the payload.
#[derive(Clone)]
pub struct HmacSha256Signer {
    secret: Vec<u8>,
}

impl HmacSha256Signer {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }
}

impl std::fmt::Debug for HmacSha256Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSha256Signer").finish_non_exhaustive()
    }
}

impl Signer for HmacSha256Signer {
    fn sign(&self, payload: &str) -> String {
        // HMAC takes keys of any length.
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.secret) else {
            return String::new();
        };
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}
