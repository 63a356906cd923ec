//! HMAC-SHA256 signatures for outgoing webhook bodies.
//!
//! The signature covers the exact bytes sent as the request body and is
//! rendered as `sha256=<lowercase hex>`. The tag prefix lets receivers tell
//! schemes apart if another algorithm is added later.

use herald_core::SigningSecret;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm tag prepended to every signature.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Signature generation or verification failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// The key was rejected by the MAC implementation.
    #[error("invalid signing key")]
    InvalidKey,

    /// The header does not start with `sha256=`.
    #[error("unsupported signature scheme, expected '{SIGNATURE_PREFIX}<hex>'")]
    UnsupportedScheme,

    /// The hex part could not be decoded.
    #[error("signature is not valid hex")]
    MalformedHex,

    /// Well-formed signature over different bytes or a different key.
    #[error("signature mismatch")]
    Mismatch,
}

fn mac(secret: &SigningSecret) -> Result<HmacSha256, SignatureError> {
    HmacSha256::new_from_slice(secret.expose()).map_err(|_| SignatureError::InvalidKey)
}

/// Signs `payload` and returns the full header value, `sha256=<hex>`.
///
/// # Errors
///
/// Returns `SignatureError::InvalidKey` if the MAC rejects the key.
pub fn sign(payload: &[u8], secret: &SigningSecret) -> Result<String, SignatureError> {
    let mut mac = mac(secret)?;
    mac.update(payload);
    Ok(format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes())))
}

/// Checks a `sha256=<hex>` header against `payload` in constant time.
///
/// # Errors
///
/// Returns the reason the header was rejected.
pub fn verify(payload: &[u8], header: &str, secret: &SigningSecret) -> Result<(), SignatureError> {
    let encoded = header.trim().strip_prefix(SIGNATURE_PREFIX).ok_or(SignatureError::UnsupportedScheme)?;
    let expected = hex::decode(encoded).map_err(|_| SignatureError::MalformedHex)?;

    let mut mac = mac(secret)?;
    mac.update(payload);
    mac.verify_slice(&expected).map_err(|_| SignatureError::Mismatch)
}
