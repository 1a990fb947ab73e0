//! Nested-hash signatures for redirect requests and gateway callbacks.
//!
//! The gateway signs with a two-stage digest:
//!
//! ```text
//! H1    = hex(hash(field_1 . field_2 . … . field_n))
//! final = hex(hash(H1 . shared_secret))
//! ```
//!
//! Both SHA-1 (legacy) and SHA-256 (current) are supported because the
//! gateway account may be configured to check either one.

use std::fmt;

use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::callback::GatewayCallback;
use crate::error::PaymentError;
use crate::security::hex_digest_eq;

/// Digest algorithms accepted by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    /// Form field carrying this digest, in requests and callbacks alike.
    pub fn field_name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA1HASH",
            HashAlgorithm::Sha256 => "SHA256HASH",
        }
    }

    fn hex_digest(self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha1 => hex::encode(Sha1::digest(data)),
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// Compute the gateway's nested hash over `parts` with the shared secret.
/// Returns lowercase hex.
pub fn nested_hash(algorithm: HashAlgorithm, parts: &[&str], secret: &str) -> String {
    let inner = algorithm.hex_digest(parts.join(".").as_bytes());
    algorithm.hex_digest(format!("{inner}.{secret}").as_bytes())
}

/// Field sequence signed on outbound redirect requests.
pub fn outbound_fields<'a>(
    timestamp: &'a str,
    merchant_id: &'a str,
    order_id: &'a str,
    amount_minor_units: &'a str,
    currency: &'a str,
) -> [&'a str; 5] {
    [timestamp, merchant_id, order_id, amount_minor_units, currency]
}

/// Field sequence signed by the gateway on callbacks. Every value comes from
/// the callback itself.
pub fn inbound_fields(callback: &GatewayCallback) -> [&str; 7] {
    [
        callback.timestamp.as_str(),
        callback.merchant_id.as_str(),
        callback.order_id.as_str(),
        callback.result.as_str(),
        callback.message.as_str(),
        callback.pasref.as_str(),
        callback.authcode.as_str(),
    ]
}

/// Transient signed field set: the ordered inputs plus both digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePayload {
    pub fields: Vec<String>,
    pub sha1: String,
    pub sha256: String,
}

impl SignaturePayload {
    /// Sign `fields` with both algorithms.
    pub fn sign(fields: &[&str], secret: &str) -> Self {
        Self {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            sha1: nested_hash(HashAlgorithm::Sha1, fields, secret),
            sha256: nested_hash(HashAlgorithm::Sha256, fields, secret),
        }
    }

    pub fn digest(&self, algorithm: HashAlgorithm) -> &str {
        match algorithm {
            HashAlgorithm::Sha1 => &self.sha1,
            HashAlgorithm::Sha256 => &self.sha256,
        }
    }
}

/// Check `supplied` against the nested hash of `fields`.
pub fn verify_fields(
    algorithm: HashAlgorithm,
    fields: &[&str],
    secret: &str,
    supplied: &str,
) -> Result<(), PaymentError> {
    let expected = nested_hash(algorithm, fields, secret);
    if hex_digest_eq(&expected, supplied) {
        Ok(())
    } else {
        Err(PaymentError::SignatureInvalid(algorithm))
    }
}

/// Verify a gateway callback with whichever digest it carries.
///
/// SHA-256 wins when both are present. Only the supplied digest is
/// recomputed. Fails closed with [`PaymentError::SignatureMissing`] when
/// neither field is present.
pub fn verify_callback(
    callback: &GatewayCallback,
    secret: &str,
) -> Result<HashAlgorithm, PaymentError> {
    let (algorithm, supplied) = match (&callback.sha256hash, &callback.sha1hash) {
        (Some(sig), _) => (HashAlgorithm::Sha256, sig),
        (None, Some(sig)) => (HashAlgorithm::Sha1, sig),
        (None, None) => return Err(PaymentError::SignatureMissing),
    };

    verify_fields(algorithm, &inbound_fields(callback), secret, supplied)?;
    Ok(algorithm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const SECRET: &str = "secret";

    fn callback_fields() -> BTreeMap<String, String> {
        [
            ("TIMESTAMP", "20240115103000"),
            ("MERCHANT_ID", "storefront"),
            ("ORDER_ID", "AB12CD"),
            ("RESULT", "00"),
            ("MESSAGE", "[ test system ] AUTHORISED"),
            ("PASREF", "14631546336115597"),
            ("AUTHCODE", "12345"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn signed_callback(algorithm: HashAlgorithm) -> GatewayCallback {
        let mut fields = callback_fields();
        let unsigned = GatewayCallback::from_fields(fields.clone()).unwrap();
        let sig = nested_hash(algorithm, &inbound_fields(&unsigned), SECRET);
        fields.insert(algorithm.field_name().to_string(), sig);
        GatewayCallback::from_fields(fields).unwrap()
    }

    #[test]
    fn test_sha1_known_vector() {
        // hex(sha1("")) then sha1 of "<that>.secret"
        let inner = hex::encode(Sha1::digest(b""));
        assert_eq!(inner, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        let expected = hex::encode(Sha1::digest(format!("{inner}.{SECRET}").as_bytes()));
        assert_eq!(nested_hash(HashAlgorithm::Sha1, &[""], SECRET), expected);
    }

    #[test]
    fn test_deterministic() {
        let fields = outbound_fields("20240115103000", "storefront", "AB12CD", "12345", "EUR");
        let a = SignaturePayload::sign(&fields, SECRET);
        let b = SignaturePayload::sign(&fields, SECRET);
        assert_eq!(a, b);
        assert_eq!(a.sha1.len(), 40);
        assert_eq!(a.sha256.len(), 64);
    }

    #[test]
    fn test_single_character_change_changes_digest() {
        let base = outbound_fields("20240115103000", "storefront", "AB12CD", "12345", "EUR");
        let neighbour = outbound_fields("20240115103000", "storefront", "AB12CE", "12345", "EUR");
        let a = SignaturePayload::sign(&base, SECRET);
        let b = SignaturePayload::sign(&neighbour, SECRET);
        assert_ne!(a.sha1, b.sha1);
        assert_ne!(a.sha256, b.sha256);

        let other_secret = SignaturePayload::sign(&base, "secreT");
        assert_ne!(a.sha256, other_secret.sha256);
    }

    #[test]
    fn test_outbound_round_trip() {
        let fields = outbound_fields("20240115103000", "storefront", "AB12CD", "12345", "EUR");
        let payload = SignaturePayload::sign(&fields, SECRET);
        for algorithm in [HashAlgorithm::Sha1, HashAlgorithm::Sha256] {
            assert!(
                verify_fields(algorithm, &fields, SECRET, payload.digest(algorithm)).is_ok()
            );
        }
    }

    #[test]
    fn test_verify_callback_sha256() {
        let cb = signed_callback(HashAlgorithm::Sha256);
        assert_eq!(verify_callback(&cb, SECRET).unwrap(), HashAlgorithm::Sha256);
    }

    #[test]
    fn test_verify_callback_sha1() {
        let cb = signed_callback(HashAlgorithm::Sha1);
        assert_eq!(verify_callback(&cb, SECRET).unwrap(), HashAlgorithm::Sha1);
    }

    #[test]
    fn test_verify_callback_uppercase_digest() {
        let mut cb = signed_callback(HashAlgorithm::Sha256);
        cb.sha256hash = cb.sha256hash.map(|s| s.to_uppercase());
        assert!(verify_callback(&cb, SECRET).is_ok());
    }

    #[test]
    fn test_verify_callback_missing_digest_fails_closed() {
        let cb = GatewayCallback::from_fields(callback_fields()).unwrap();
        assert!(matches!(
            verify_callback(&cb, SECRET),
            Err(PaymentError::SignatureMissing)
        ));
    }

    #[test]
    fn test_verify_callback_tampered_result() {
        let mut cb = signed_callback(HashAlgorithm::Sha256);
        cb.result = "101".to_string();
        assert!(matches!(
            verify_callback(&cb, SECRET),
            Err(PaymentError::SignatureInvalid(HashAlgorithm::Sha256))
        ));
    }

    #[test]
    fn test_verify_callback_wrong_secret() {
        let cb = signed_callback(HashAlgorithm::Sha1);
        assert!(verify_callback(&cb, "other").is_err());
    }
}
