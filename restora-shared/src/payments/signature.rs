/// Stripe webhook signature verification
///
/// The `Stripe-Signature` header looks like `t=1492774577,v1=5257a8...,v1=...`.
/// The signed payload is `"{t}.{raw body}"`, signed with HMAC-SHA256 under the
/// endpoint secret. Any one matching `v1` entry is accepted, and the timestamp
/// must be within the tolerance of now.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::PaymentError;

/// Default accepted clock difference, in seconds
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

/// Computes the hex `v1` signature for a payload
pub fn compute_signature(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, PaymentError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::InvalidSignature(format!("Invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a `Stripe-Signature` header against the raw request body
///
/// `now` is the current Unix time, passed in for testability.
pub fn verify(
    header: &str,
    body: &[u8],
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), PaymentError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| PaymentError::InvalidSignature("Missing timestamp".to_string()))?;

    if signatures.is_empty() {
        return Err(PaymentError::InvalidSignature("Missing v1 signature".to_string()));
    }

    if (now - timestamp).abs() > tolerance_secs {
        return Err(PaymentError::InvalidSignature(
            "Timestamp outside the tolerance zone".to_string(),
        ));
    }

    let matches = signatures.iter().any(|candidate| {
        HmacSha256::new_from_slice(secret.as_bytes())
            .map(|mut mac| {
                mac.update(timestamp.to_string().as_bytes());
                mac.update(b".");
                mac.update(body);
                // constant-time comparison
                mac.verify_slice(candidate).is_ok()
            })
            .unwrap_or(false)
    });

    if matches {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature(
            "No signature matches the payload".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
    const NOW: i64 = 1_700_000_000;

    fn header_for(timestamp: i64, body: &[u8]) -> String {
        format!("t={},v1={}", timestamp, compute_signature(SECRET, timestamp, body).unwrap())
    }

    #[test]
    fn test_valid_signature() {
        assert!(verify(&header_for(NOW, BODY), BODY, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_ok());
    }

    #[test]
    fn test_any_v1_may_match() {
        let good = compute_signature(SECRET, NOW, BODY).unwrap();
        let header = format!("t={},v1={},v1={},v0=ignored", NOW, "ab".repeat(32), good);
        assert!(verify(&header, BODY, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = header_for(NOW, BODY);
        let tampered = br#"{"id":"evt_1","type":"checkout.session.expired"}"#;
        assert!(verify(&header, tampered, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let header = header_for(NOW, BODY);
        assert!(verify(&header, BODY, "whsec_other", DEFAULT_TOLERANCE_SECS, NOW).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let header = header_for(NOW - 301, BODY);
        assert!(verify(&header, BODY, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
    }

    #[test]
    fn test_malformed_headers_rejected() {
        assert!(verify("", BODY, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
        assert!(verify("v1=abcd", BODY, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
        assert!(verify(&format!("t={}", NOW), BODY, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
        assert!(verify("t=abc,v1=zz", BODY, SECRET, DEFAULT_TOLERANCE_SECS, NOW).is_err());
    }
}
