//! Typed view of the gateway's asynchronous settlement notification.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::constants::SUCCESS_RESULT;
use crate::error::PaymentError;

/// Parsed callback. Signed fields that the gateway omitted are kept as empty
/// strings so verification runs over exactly what was sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayCallback {
    pub order_id: String,
    pub result: String,
    pub timestamp: String,
    pub merchant_id: String,
    pub message: String,
    pub pasref: String,
    pub authcode: String,
    pub sha1hash: Option<String>,
    pub sha256hash: Option<String>,
    /// Vendor fields not modelled above (BATCHID, pass-through fields, ...),
    /// preserved for audit.
    pub extra: BTreeMap<String, String>,
}

impl GatewayCallback {
    /// Build from the flat POST field map.
    ///
    /// `ORDER_ID` and `RESULT` are mandatory; without them there is nothing to
    /// settle.
    pub fn from_fields(mut fields: BTreeMap<String, String>) -> Result<Self, PaymentError> {
        let order_id = take_required(&mut fields, "ORDER_ID")?;
        let result = take_required(&mut fields, "RESULT")?;

        let mut take = |name: &str| fields.remove(name).unwrap_or_default();
        let timestamp = take("TIMESTAMP");
        let merchant_id = take("MERCHANT_ID");
        let message = take("MESSAGE");
        let pasref = take("PASREF");
        let authcode = take("AUTHCODE");

        let sha1hash = fields.remove("SHA1HASH").filter(|s| !s.trim().is_empty());
        let sha256hash = fields.remove("SHA256HASH").filter(|s| !s.trim().is_empty());

        Ok(Self {
            order_id,
            result,
            timestamp,
            merchant_id,
            message,
            pasref,
            authcode,
            sha1hash,
            sha256hash,
            extra: fields,
        })
    }

    /// The gateway's result code alone decides success.
    pub fn is_success(&self) -> bool {
        self.result == SUCCESS_RESULT
    }

    /// Order number without the display `#` prefix some integrations echo back.
    pub fn order_number(&self) -> &str {
        self.order_id.trim().trim_start_matches('#')
    }

    /// Gateway payment reference, if one was issued.
    pub fn payment_reference(&self) -> Option<&str> {
        Some(self.pasref.as_str()).filter(|s| !s.is_empty())
    }
}

fn take_required(
    fields: &mut BTreeMap<String, String>,
    name: &'static str,
) -> Result<String, PaymentError> {
    fields
        .remove(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or(PaymentError::MalformedCallback(name))
}
