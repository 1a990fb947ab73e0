use thiserror::Error;

use crate::signature::HashAlgorithm;

/// Errors returned by the hosted payment page protocol.
#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("callback carries neither SHA1HASH nor SHA256HASH")]
    SignatureMissing,

    #[error("callback {0} does not match the recomputed digest")]
    SignatureInvalid(HashAlgorithm),

    #[error("malformed callback: missing {0}")]
    MalformedCallback(&'static str),

    #[error("unsupported country code: {0}")]
    UnsupportedCountry(String),
}

impl PaymentError {
    /// True for the verification-stage errors that settlement tolerates by default.
    pub fn is_signature_error(&self) -> bool {
        matches!(
            self,
            PaymentError::SignatureMissing | PaymentError::SignatureInvalid(_)
        )
    }
}
