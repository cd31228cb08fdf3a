//! GitHub `X-Hub-Signature-256` verification

use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

use crate::error::{DeployError, Result};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verify that `signature_header` is `sha256=<hex HMAC-SHA256 of payload>`
/// keyed with `secret`. The digest comparison is constant-time.
pub fn verify_github_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    let Some(git_signature) = signature_header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    let git_signature_bytes = match hex_decode(git_signature) {
        Ok(bytes) => bytes,
        Err(_) => {
            debug!("Signature header is not valid hex");
            return false;
        }
    };

    // HMAC accepts keys of any length, including empty
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&git_signature_bytes).is_ok()
}

/// Same check as [`verify_github_signature`], failing with `AuthenticationFailure`
pub fn authenticate(secret: &str, payload: &[u8], signature_header: &str) -> Result<()> {
    if verify_github_signature(secret, payload, signature_header) {
        Ok(())
    } else {
        Err(DeployError::AuthenticationFailure)
    }
}
