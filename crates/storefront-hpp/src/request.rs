//! Signed redirect request for the hosted payment page.
//!
//! The builder is a pure projection of an order onto the gateway's field set.
//! It never reads or changes order status.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use html_escape::encode_double_quoted_attribute;
use serde::Serialize;

use crate::constants::{GatewaySettings, HPP_VERSION, TIMESTAMP_FORMAT};
use crate::country;
use crate::error::PaymentError;
use crate::order::{Order, ShippingAddress};
use crate::sanitize::{decimal_to_minor_units, sanitize_field};
use crate::signature::{outbound_fields, HashAlgorithm, SignaturePayload};

/// Pass-through fields the gateway echoes back on the callback.
pub const SUCCESS_URL_FIELD: &str = "SUCCESS_URL";
pub const FAILURE_URL_FIELD: &str = "FAILURE_URL";

/// Target endpoint plus the form fields to POST there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRequest {
    pub endpoint: String,
    pub fields: BTreeMap<String, String>,
}

impl PaymentRequest {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Self-submitting HTML form that sends the customer to the hosted page.
    pub fn to_html_form(&self) -> String {
        let mut inputs = String::new();
        for (name, value) in &self.fields {
            inputs.push_str(&format!(
                "      <input type=\"hidden\" name=\"{}\" value=\"{}\">\n",
                encode_double_quoted_attribute(name),
                encode_double_quoted_attribute(value)
            ));
        }

        format!(
            "<!DOCTYPE html>\n\
             <html>\n\
             <head><meta charset=\"utf-8\"><title>Redirecting to payment</title></head>\n\
             <body onload=\"document.forms[0].submit()\">\n\
             <form method=\"POST\" action=\"{action}\">\n\
             {inputs}      <noscript><button type=\"submit\">Continue to payment</button></noscript>\n\
             </form>\n\
             </body>\n\
             </html>\n",
            action = encode_double_quoted_attribute(&self.endpoint),
        )
    }
}

/// Builds signed [`PaymentRequest`]s from validated gateway settings.
#[derive(Debug, Clone)]
pub struct PaymentRequestBuilder<'a> {
    settings: &'a GatewaySettings,
}

impl<'a> PaymentRequestBuilder<'a> {
    /// Fails with [`PaymentError::Configuration`] when credentials are missing,
    /// so no request is ever signed with an empty secret.
    pub fn new(settings: &'a GatewaySettings) -> Result<Self, PaymentError> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn build(
        &self,
        order: &Order,
        shipping: &ShippingAddress,
        success_url: &str,
        failure_url: &str,
    ) -> Result<PaymentRequest, PaymentError> {
        self.build_at(order, shipping, success_url, failure_url, Utc::now())
    }

    /// [`build`](Self::build) with an explicit clock, for reproducible output.
    pub fn build_at(
        &self,
        order: &Order,
        shipping: &ShippingAddress,
        success_url: &str,
        failure_url: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentRequest, PaymentError> {
        let settings = self.settings;

        let amount = decimal_to_minor_units(order.total)?;
        let country = country::lookup(&shipping.country)
            .ok_or_else(|| PaymentError::UnsupportedCountry(shipping.country.clone()))?;

        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let signature = SignaturePayload::sign(
            &outbound_fields(
                &timestamp,
                &settings.merchant_id,
                &order.order_number,
                &amount,
                &settings.currency,
            ),
            &settings.shared_secret,
        );

        let street = sanitize_field(&shipping.address);
        let city = sanitize_field(&shipping.city);
        let postal_code = sanitize_field(&shipping.postal_code);

        let mut fields = BTreeMap::new();
        let mut put = |name: &str, value: String| {
            fields.insert(name.to_string(), value);
        };

        put("MERCHANT_ID", settings.merchant_id.clone());
        put("ACCOUNT", settings.account.clone());
        put("ORDER_ID", order.order_number.clone());
        put("AMOUNT", amount);
        put("CURRENCY", settings.currency.clone());
        put("TIMESTAMP", timestamp);
        put(
            HashAlgorithm::Sha1.field_name(),
            signature.digest(HashAlgorithm::Sha1).to_string(),
        );
        put(
            HashAlgorithm::Sha256.field_name(),
            signature.digest(HashAlgorithm::Sha256).to_string(),
        );
        put(
            "AUTO_SETTLE_FLAG",
            if settings.auto_settle { "1" } else { "0" }.to_string(),
        );
        put("HPP_VERSION", HPP_VERSION.to_string());
        put("HPP_LANG", settings.language.clone());
        put("MERCHANT_RESPONSE_URL", settings.response_url.clone());
        put("HPP_CUSTOMER_EMAIL", order.email.trim().to_string());
        if let Some(mobile) = country::mobile_number(country, &shipping.phone) {
            put("HPP_CUSTOMER_PHONENUMBER_MOBILE", mobile);
        }

        // Billing: numeric country code
        put("HPP_BILLING_STREET1", street.clone());
        put("HPP_BILLING_CITY", city.clone());
        put("HPP_BILLING_POSTALCODE", postal_code.clone());
        put("HPP_BILLING_COUNTRY", country.numeric.to_string());

        // Shipping: same address, alpha-2 country code
        put("HPP_SHIPPING_STREET1", street);
        put("HPP_SHIPPING_CITY", city);
        put("HPP_SHIPPING_POSTALCODE", postal_code);
        put("HPP_SHIPPING_COUNTRY", country.alpha2.to_string());
        put("HPP_ADDRESS_MATCH_INDICATOR", "TRUE".to_string());

        put("COMMENT1", format!("Order {}", order.display_number()));
        put(
            "COMMENT2",
            sanitize_field(&format!("{} {}", shipping.first_name, shipping.last_name)),
        );
        put(SUCCESS_URL_FIELD, success_url.to_string());
        put(FAILURE_URL_FIELD, failure_url.to_string());

        tracing::debug!(
            order = %order.order_number,
            amount = %order.total,
            currency = %settings.currency,
            "built hosted payment request"
        );

        Ok(PaymentRequest {
            endpoint: settings.endpoint.clone(),
            fields,
        })
    }
}
