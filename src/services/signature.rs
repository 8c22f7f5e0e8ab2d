//! HMAC-SHA256 verification for the relay webhook.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";
const PREFIX: &str = "sha256=";

pub fn sign(body: &[u8], secret: &str) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(body);
    Ok(format!("{}{}", PREFIX, hex::encode(mac.finalize().into_bytes())))
}

/// Check a `sha256=<hex>` header against the raw body.
pub fn verify(body: &[u8], header: Option<&str>, secret: &str) -> AppResult<()> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(AppError::InvalidSignature)?;

    let provided_hex = header
        .strip_prefix(PREFIX)
        .ok_or(AppError::InvalidSignature)?;
    let provided = hex::decode(provided_hex).map_err(|_| AppError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::InvalidSignature)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    let expected: &[u8] = expected.as_ref();
    if expected.ct_eq(&provided[..]).into() {
        Ok(())
    } else {
        tracing::warn!(body_size = body.len(), "Webhook signature mismatch");
        Err(AppError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    const SECRET: &str = "s3cret";

    #[test]
    fn accepts_a_matching_signature() {
        let body = br#"{"mensagem":"oi"}"#;
        let header = assert_ok!(sign(body, SECRET));
        assert!(header.starts_with("sha256="));
        assert_ok!(verify(body, Some(&header), SECRET));
    }

    #[test]
    fn rejects_tampered_body_and_wrong_secret() {
        let header = sign(b"original", SECRET).unwrap();
        assert!(matches!(
            verify(b"tampered", Some(&header), SECRET),
            Err(AppError::InvalidSignature)
        ));
        assert_err!(verify(b"original", Some(&header), "other"));
    }

    #[test]
    fn rejects_missing_or_malformed_headers() {
        assert_err!(verify(b"x", None, SECRET));
        assert_err!(verify(b"x", Some(""), SECRET));
        assert_err!(verify(b"x", Some("md5=abcd"), SECRET));
        assert_err!(verify(b"x", Some("sha256=not-hex"), SECRET));
        assert_err!(verify(b"x", Some("sha256=abcd"), SECRET));
    }
}
