use std::fmt;

use crate::error::PaymentError;

/// Result code the gateway uses for an authorised payment.
pub const SUCCESS_RESULT: &str = "00";

/// Provider name recorded on orders paid through the hosted page.
pub const PROVIDER_NAME: &str = "addon-payments";

/// Hosted page protocol version.
pub const HPP_VERSION: &str = "2";

/// Sandbox hosted page endpoint.
pub const SANDBOX_ENDPOINT: &str = "https://hpp.sandbox.addonpayments.com/pay";

/// Live hosted page endpoint.
pub const LIVE_ENDPOINT: &str = "https://hpp.addonpayments.com/pay";

pub const DEFAULT_CURRENCY: &str = "EUR";

pub const DEFAULT_LANGUAGE: &str = "es";

/// Compact UTC timestamp format expected in `TIMESTAMP`.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Merchant credentials and hosted page options.
///
/// Built once at startup and shared by reference with the request builder and
/// the settlement handler.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    pub merchant_id: String,
    /// Terminal / sub-account (`ACCOUNT`)
    pub account: String,
    pub shared_secret: String,
    pub endpoint: String,
    pub currency: String,
    pub language: String,
    /// Where the gateway POSTs the settlement callback (`MERCHANT_RESPONSE_URL`)
    pub response_url: String,
    pub auto_settle: bool,
}

impl fmt::Debug for GatewaySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewaySettings")
            .field("merchant_id", &self.merchant_id)
            .field("account", &self.account)
            .field("shared_secret", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .field("currency", &self.currency)
            .field("language", &self.language)
            .field("response_url", &self.response_url)
            .field("auto_settle", &self.auto_settle)
            .finish()
    }
}

impl GatewaySettings {
    /// Sandbox settings with the given credentials; other options defaulted.
    pub fn sandbox(merchant_id: &str, account: &str, shared_secret: &str) -> Self {
        Self {
            merchant_id: merchant_id.to_string(),
            account: account.to_string(),
            shared_secret: shared_secret.to_string(),
            endpoint: SANDBOX_ENDPOINT.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            language: DEFAULT_LANGUAGE.to_string(),
            response_url: String::new(),
            auto_settle: true,
        }
    }

    /// Reject settings that cannot produce a valid signed request.
    pub fn validate(&self) -> Result<(), PaymentError> {
        let required = [
            ("merchant id", &self.merchant_id),
            ("account", &self.account),
            ("shared secret", &self.shared_secret),
            ("endpoint", &self.endpoint),
            ("currency", &self.currency),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(PaymentError::Configuration(format!("{name} is not set")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_secret() {
        let settings = GatewaySettings::sandbox("merchant", "internet", "hunter2");
        let out = format!("{settings:?}");
        assert!(!out.contains("hunter2"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn test_validate_requires_credentials() {
        assert!(GatewaySettings::sandbox("merchant", "internet", "s")
            .validate()
            .is_ok());
        assert!(matches!(
            GatewaySettings::sandbox("", "internet", "s").validate(),
            Err(PaymentError::Configuration(_))
        ));
        assert!(GatewaySettings::sandbox("merchant", "internet", " ")
            .validate()
            .is_err());
    }
}
