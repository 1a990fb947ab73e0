use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use url::Url;

use hpp::{GatewaySettings, DEFAULT_CURRENCY, DEFAULT_LANGUAGE, SANDBOX_ENDPOINT};

use crate::settlement::SignaturePolicy;

const DEFAULT_PORT: u16 = 4040;
const DEFAULT_DB_PATH: &str = "./storefront.db";
const DEFAULT_RATE_LIMIT_RPM: u32 = 60;
const DEFAULT_SHIPPING_SURCHARGE: &str = "4.95";
const MIN_SECRET_LEN: usize = 16;

#[derive(Clone)]
pub struct ServerConfig {
    /// Merchant credentials and hosted page options
    pub gateway: GatewaySettings,
    /// What to do with callbacks whose signature does not verify
    pub signature_policy: SignaturePolicy,
    /// Flat shipping charge added to every order
    pub shipping_surcharge: Decimal,
    /// Where the gateway sends the customer after an approved payment
    pub success_url: String,
    /// Where the gateway sends the customer after a declined payment
    pub failure_url: String,
    /// SQLite database path
    pub db_path: String,
    /// Server port
    pub port: u16,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute
    pub rate_limit_rpm: u32,
    /// Bearer token required for /metrics endpoint (None = public)
    pub metrics_token: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("gateway", &self.gateway)
            .field("signature_policy", &self.signature_policy)
            .field("shipping_surcharge", &self.shipping_surcharge)
            .field("success_url", &self.success_url)
            .field("failure_url", &self.failure_url)
            .field("db_path", &self.db_path)
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| var(key).ok_or(ConfigError::MissingRequired(key));
        let flag = |key: &str| {
            var(key)
                .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
                .unwrap_or(false)
        };

        // Required: merchant credentials
        let merchant_id = required("HPP_MERCHANT_ID")?;
        let account = required("HPP_ACCOUNT")?;
        let shared_secret = required("HPP_SHARED_SECRET")?;

        let endpoint = var("HPP_ENDPOINT").unwrap_or_else(|| SANDBOX_ENDPOINT.to_string());
        validate_url(&endpoint)?;

        let response_url = required("HPP_RESPONSE_URL")?;
        validate_url(&response_url)?;

        let currency = var("HPP_CURRENCY")
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string())
            .to_uppercase();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ConfigError::InvalidValue("HPP_CURRENCY", currency));
        }

        let language = var("HPP_LANG").unwrap_or_else(|| DEFAULT_LANGUAGE.to_string());

        let auto_settle = var("HPP_AUTO_SETTLE")
            .map(|v| v != "0" && !v.eq_ignore_ascii_case("false"))
            .unwrap_or(true);

        let gateway = GatewaySettings {
            merchant_id,
            account,
            shared_secret,
            endpoint,
            currency,
            language,
            response_url,
            auto_settle,
        };
        gateway
            .validate()
            .map_err(|e| ConfigError::Gateway(e.to_string()))?;

        let signature_policy = if flag("HPP_STRICT_SIGNATURES") {
            SignaturePolicy::Strict
        } else {
            SignaturePolicy::Tolerant
        };

        let surcharge_raw =
            var("SHIPPING_SURCHARGE").unwrap_or_else(|| DEFAULT_SHIPPING_SURCHARGE.to_string());
        let shipping_surcharge = Decimal::from_str(&surcharge_raw)
            .ok()
            .filter(|d| !d.is_sign_negative() && hpp::has_whole_cents(*d))
            .ok_or(ConfigError::InvalidValue("SHIPPING_SURCHARGE", surcharge_raw))?;

        // Optional: customer landing pages, echoed back by the gateway
        let success_url = var("CHECKOUT_SUCCESS_URL")
            .unwrap_or_else(|| "http://localhost:3000/checkout/success".to_string());
        validate_url(&success_url)?;
        let failure_url = var("CHECKOUT_FAILURE_URL")
            .unwrap_or_else(|| "http://localhost:3000/checkout/failure".to_string());
        validate_url(&failure_url)?;

        let db_path = var("DB_PATH").unwrap_or_else(|| DEFAULT_DB_PATH.to_string());

        let port = var("PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let allowed_origins: Vec<String> = var("ALLOWED_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        let rate_limit_rpm = var("RATE_LIMIT_RPM")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_RPM);

        let metrics_token = var("METRICS_TOKEN");
        let dev_mode = flag("STOREFRONT_DEV_MODE");

        if gateway.shared_secret.len() < MIN_SECRET_LEN {
            tracing::warn!(
                "HPP_SHARED_SECRET is short ({} bytes); use the secret issued by the gateway",
                gateway.shared_secret.len()
            );
        }

        if signature_policy == SignaturePolicy::Tolerant {
            tracing::warn!(
                "HPP_STRICT_SIGNATURES is off: callbacks with invalid or missing signatures \
                 will still settle orders"
            );
        }

        // Reject wildcard CORS outside dev mode
        if allowed_origins.iter().any(|o| o == "*") && !dev_mode {
            tracing::error!(
                "Wildcard CORS origin '*' is not allowed for checkout endpoints. \
                 Specify explicit origins in ALLOWED_ORIGINS, or set STOREFRONT_DEV_MODE=true."
            );
            return Err(ConfigError::InvalidValue(
                "ALLOWED_ORIGINS",
                "wildcard '*' outside dev mode".to_string(),
            ));
        }

        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set; /metrics endpoint is publicly accessible");
        }

        Ok(Self {
            gateway,
            signature_policy,
            shipping_surcharge,
            success_url,
            failure_url,
            db_path,
            port,
            allowed_origins,
            rate_limit_rpm,
            metrics_token,
        })
    }
}

fn validate_url(value: &str) -> Result<(), ConfigError> {
    let url = Url::parse(value).map_err(|_| ConfigError::InvalidUrl(value.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        _ => Err(ConfigError::InvalidUrl(value.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("gateway settings: {0}")]
    Gateway(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("HPP_MERCHANT_ID", "storefront"),
            ("HPP_ACCOUNT", "internet"),
            ("HPP_SHARED_SECRET", "0123456789abcdef0123"),
            ("HPP_RESPONSE_URL", "https://shop.example.com/payments/callback"),
        ])
    }

    fn load(vars: &HashMap<&'static str, &'static str>) -> Result<ServerConfig, ConfigError> {
        ServerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn test_defaults() {
        let config = load(&base()).unwrap();
        assert_eq!(config.gateway.endpoint, SANDBOX_ENDPOINT);
        assert_eq!(config.gateway.currency, "EUR");
        assert_eq!(config.gateway.language, "es");
        assert!(config.gateway.auto_settle);
        assert_eq!(config.signature_policy, SignaturePolicy::Tolerant);
        assert_eq!(config.shipping_surcharge, Decimal::new(495, 2));
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.metrics_token.is_none());
    }

    #[test]
    fn test_missing_secret_is_fatal() {
        let mut vars = base();
        vars.remove("HPP_SHARED_SECRET");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::MissingRequired("HPP_SHARED_SECRET"))
        ));

        vars.insert("HPP_SHARED_SECRET", "   ");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::MissingRequired("HPP_SHARED_SECRET"))
        ));
    }

    #[test]
    fn test_strict_signatures_flag() {
        let mut vars = base();
        vars.insert("HPP_STRICT_SIGNATURES", "true");
        assert_eq!(load(&vars).unwrap().signature_policy, SignaturePolicy::Strict);
    }

    #[test]
    fn test_rejects_bad_urls_and_surcharge() {
        let mut vars = base();
        vars.insert("HPP_ENDPOINT", "not a url");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidUrl(_))));

        let mut vars = base();
        vars.insert("HPP_RESPONSE_URL", "ftp://shop.example.com/cb");
        assert!(matches!(load(&vars), Err(ConfigError::InvalidUrl(_))));

        let mut vars = base();
        vars.insert("SHIPPING_SURCHARGE", "-1");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::InvalidValue("SHIPPING_SURCHARGE", _))
        ));

        vars.insert("SHIPPING_SURCHARGE", "4.955");
        assert!(matches!(
            load(&vars),
            Err(ConfigError::InvalidValue("SHIPPING_SURCHARGE", _))
        ));
    }

    #[test]
    fn test_wildcard_cors_needs_dev_mode() {
        let mut vars = base();
        vars.insert("ALLOWED_ORIGINS", "*");
        assert!(load(&vars).is_err());

        vars.insert("STOREFRONT_DEV_MODE", "true");
        assert_eq!(load(&vars).unwrap().allowed_origins, vec!["*".to_string()]);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base();
        vars.insert("METRICS_TOKEN", "metrics-token-value");
        let debug = format!("{:?}", load(&vars).unwrap());
        assert!(!debug.contains("0123456789abcdef0123"));
        assert!(!debug.contains("metrics-token-value"));
        assert!(debug.contains("[REDACTED]"));
    }
}
