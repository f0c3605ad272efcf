// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook signature verification.
//!
//! Spacelift signs each delivery with the secret the provisioner registered:
//! `X-Signature-256: sha256=<hex(HMAC-SHA256(secret, raw body))>`. The MAC is
//! computed over the raw request bytes, never a re-serialized payload.

use axum::http::StatusCode;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "X-Signature-256";

const SIGNATURE_PREFIX: &str = "sha256=";

type HmacSha256 = Hmac<Sha256>;

/// Why a delivery was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    /// The request carried no signature header.
    #[error("Missing webhook signature")]
    MissingSignature,

    /// The signature does not match the body.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// No webhook secret is available to verify against.
    #[error("Webhook secret unavailable")]
    SecretUnavailable,
}

impl SignatureError {
    /// HTTP status the endpoint answers with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            SignatureError::MissingSignature => StatusCode::BAD_REQUEST,
            SignatureError::InvalidSignature => StatusCode::UNAUTHORIZED,
            SignatureError::SecretUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Signature header value for `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac = mac(secret)?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a delivery.
///
/// The comparison runs in constant time. A header without the `sha256=`
/// prefix or with malformed hex is an invalid signature.
pub fn verify(
    raw_body: &[u8],
    header: Option<&str>,
    secret: Option<&str>,
) -> Result<(), SignatureError> {
    let header = header
        .filter(|h| !h.is_empty())
        .ok_or(SignatureError::MissingSignature)?;
    let secret = secret
        .filter(|s| !s.is_empty())
        .ok_or(SignatureError::SecretUnavailable)?;

    let provided = header
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|h| hex::decode(h).ok())
        .ok_or(SignatureError::InvalidSignature)?;

    let mut mac = mac(secret)?;
    mac.update(raw_body);
    mac.verify_slice(&provided)
        .map_err(|_| SignatureError::InvalidSignature)
}

fn mac(secret: &str) -> Result<HmacSha256, SignatureError> {
    <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::SecretUnavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // HMAC-SHA256(key = "s", message = "b")
        let mut mac = <HmacSha256 as Mac>::new_from_slice(b"s").unwrap();
        mac.update(b"b");
        let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert_eq!(sign("s", b"b").unwrap(), expected);
        assert_eq!(verify(b"b", Some(&expected), Some("s")), Ok(()));
    }

    #[test]
    fn test_bit_flip_rejected() {
        let header = sign("s", b"b").unwrap();

        let mut bytes = hex::decode(header.trim_start_matches("sha256=")).unwrap();
        bytes[0] ^= 0x01;
        let flipped = format!("sha256={}", hex::encode(bytes));

        assert_eq!(
            verify(b"b", Some(&flipped), Some("s")),
            Err(SignatureError::InvalidSignature)
        );
        assert_eq!(
            verify(b"c", Some(&header), Some("s")),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_malformed_headers() {
        let header = sign("s", b"b").unwrap();

        assert_eq!(
            verify(b"b", Some(header.trim_start_matches("sha256=")), Some("s")),
            Err(SignatureError::InvalidSignature)
        );
        assert_eq!(
            verify(b"b", Some("sha256=zz"), Some("s")),
            Err(SignatureError::InvalidSignature)
        );
        assert_eq!(
            verify(b"b", Some("sha256="), Some("s")),
            Err(SignatureError::InvalidSignature)
        );
    }

    #[test]
    fn test_missing_inputs() {
        assert_eq!(
            verify(b"b", None, Some("s")),
            Err(SignatureError::MissingSignature)
        );
        assert_eq!(
            verify(b"b", Some(&sign("s", b"b").unwrap()), None),
            Err(SignatureError::SecretUnavailable)
        );
        assert_eq!(
            SignatureError::MissingSignature.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            SignatureError::InvalidSignature.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            SignatureError::SecretUnavailable.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
