//! Settlement of hosted-page payments.
//!
//! A callback moves an order out of `PENDING` exactly once. The status
//! transition is a compare-and-set inside a `BEGIN IMMEDIATE` transaction that
//! also applies the stock decrements, so gateway redeliveries (sequential or
//! concurrent) never decrement stock twice.
//!
//! Signature handling follows [`SignaturePolicy`]. The default is tolerant:
//! an unverifiable callback is logged and counted, then settled anyway.
//! Deployments that do not rely on that behaviour should run with
//! [`SignaturePolicy::Strict`].

use std::collections::BTreeMap;

use rusqlite::Connection;
use serde::Serialize;

use hpp::{
    verify_callback, GatewayCallback, GatewaySettings, HashAlgorithm, OrderLineItem,
    OrderStatus, PaymentError,
};

use crate::db::{self, Database};
use crate::error::StoreError;
use crate::metrics;

/// What to do with a callback whose signature does not verify.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignaturePolicy {
    /// Log the failure and settle anyway.
    #[default]
    Tolerant,
    /// Acknowledge the callback but change nothing.
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "algorithm", rename_all = "snake_case")]
pub enum SignatureCheck {
    Verified(HashAlgorithm),
    Missing,
    Invalid(HashAlgorithm),
}

impl SignatureCheck {
    fn from_result(result: Result<HashAlgorithm, PaymentError>) -> Self {
        match result {
            Ok(alg) => SignatureCheck::Verified(alg),
            Err(PaymentError::SignatureInvalid(alg)) => SignatureCheck::Invalid(alg),
            Err(_) => SignatureCheck::Missing,
        }
    }

    pub fn is_verified(&self) -> bool {
        matches!(self, SignatureCheck::Verified(_))
    }

    fn metric_label(&self) -> &'static str {
        match self {
            SignatureCheck::Verified(_) => "verified",
            SignatureCheck::Missing => "missing",
            SignatureCheck::Invalid(_) => "invalid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SettlementOutcome {
    /// First transition to COMPLETED
    Completed,
    /// First transition to FAILED
    Failed,
    /// Order was already terminal; nothing written
    AlreadySettled(OrderStatus),
    OrderNotFound,
    /// Callback was not acted on (malformed, or unverified in strict mode)
    Rejected(String),
}

impl SettlementOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettlementOutcome::Completed => "completed",
            SettlementOutcome::Failed => "failed",
            SettlementOutcome::AlreadySettled(_) => "already_settled",
            SettlementOutcome::OrderNotFound => "order_not_found",
            SettlementOutcome::Rejected(_) => "rejected",
        }
    }
}

/// Stock taken from a variant for one line item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StockDecrement {
    pub line_item_id: i64,
    pub variant_id: i64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum LineItemIssue {
    /// No variant of the product carries the line item's attributes
    NoMatchingVariant,
    /// The matched variant has fewer units than were bought
    InsufficientStock { variant_id: i64, available: i64 },
    /// Storage error while loading variants or decrementing
    DecrementFailed { message: String },
}

impl LineItemIssue {
    fn metric_label(&self) -> &'static str {
        match self {
            LineItemIssue::NoMatchingVariant => "no_matching_variant",
            LineItemIssue::InsufficientStock { .. } => "insufficient_stock",
            LineItemIssue::DecrementFailed { .. } => "decrement_failed",
        }
    }
}

/// A line item whose stock could not be decremented. Never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantMatchFailure {
    pub line_item_id: i64,
    pub product_id: i64,
    pub name: String,
    pub quantity: u32,
    #[serde(flatten)]
    pub issue: LineItemIssue,
}

/// Everything one callback did, for the acknowledgement and the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementReport {
    pub order_number: String,
    pub outcome: SettlementOutcome,
    pub signature: Option<SignatureCheck>,
    pub decrements: Vec<StockDecrement>,
    pub failures: Vec<VariantMatchFailure>,
}

impl SettlementReport {
    fn new(order_number: &str, outcome: SettlementOutcome, signature: Option<SignatureCheck>) -> Self {
        Self {
            order_number: order_number.to_string(),
            outcome,
            signature,
            decrements: Vec::new(),
            failures: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct SettlementHandler {
    db: Database,
    settings: GatewaySettings,
    policy: SignaturePolicy,
}

impl SettlementHandler {
    pub fn new(db: Database, settings: GatewaySettings, policy: SignaturePolicy) -> Self {
        Self {
            db,
            settings,
            policy,
        }
    }

    pub fn policy(&self) -> SignaturePolicy {
        self.policy
    }

    /// Apply one gateway callback given as the flat POST field map.
    ///
    /// Only storage failures are returned as errors; every other case is a
    /// handled outcome in the report.
    pub fn handle_callback(
        &self,
        raw: BTreeMap<String, String>,
    ) -> Result<SettlementReport, StoreError> {
        let report = self.settle(raw)?;
        metrics::CALLBACKS_TOTAL
            .with_label_values(&[report.outcome.as_str()])
            .inc();
        Ok(report)
    }

    fn settle(&self, raw: BTreeMap<String, String>) -> Result<SettlementReport, StoreError> {
        let callback = match GatewayCallback::from_fields(raw.clone()) {
            Ok(cb) => cb,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting malformed payment callback");
                let number = raw.get("ORDER_ID").map(String::as_str).unwrap_or_default();
                return Ok(SettlementReport::new(
                    number,
                    SettlementOutcome::Rejected(e.to_string()),
                    None,
                ));
            }
        };
        let order_number = callback.order_number().to_string();

        let signature = SignatureCheck::from_result(verify_callback(
            &callback,
            &self.settings.shared_secret,
        ));
        if !signature.is_verified() {
            metrics::SIGNATURE_FAILURES
                .with_label_values(&[signature.metric_label()])
                .inc();
            tracing::warn!(
                order = %order_number,
                signature = signature.metric_label(),
                policy = ?self.policy,
                "payment callback signature did not verify"
            );
            if self.policy == SignaturePolicy::Strict {
                return Ok(SettlementReport::new(
                    &order_number,
                    SettlementOutcome::Rejected("signature not verified".to_string()),
                    Some(signature),
                ));
            }
        }

        if !callback.merchant_id.is_empty() && callback.merchant_id != self.settings.merchant_id {
            tracing::warn!(
                order = %order_number,
                merchant = %callback.merchant_id,
                "callback merchant id differs from configured merchant"
            );
        }

        let target = if callback.is_success() {
            OrderStatus::Completed
        } else {
            OrderStatus::Failed
        };
        let reference = callback.payment_reference();

        let mut report = SettlementReport::new(&order_number, SettlementOutcome::OrderNotFound, Some(signature));

        self.db.with_transaction(|conn| {
            let (order_id, current) = match db::order_state(conn, &order_number)? {
                Some(state) => state,
                None => return Ok(()),
            };

            if current.is_terminal()
                || !db::transition_pending(conn, &order_number, target, reference, &raw)?
            {
                report.outcome = SettlementOutcome::AlreadySettled(current);
                return Ok(());
            }

            report.outcome = match target {
                OrderStatus::Completed => SettlementOutcome::Completed,
                _ => SettlementOutcome::Failed,
            };

            if target == OrderStatus::Completed {
                for item in db::line_items(conn, order_id)? {
                    match decrement_line_item(conn, &item) {
                        Ok(Some(decrement)) => report.decrements.push(decrement),
                        Ok(None) => {}
                        Err(failure) => report.failures.push(failure),
                    }
                }
            }
            Ok(())
        })?;

        self.log_report(&report, &callback);
        Ok(report)
    }

    fn log_report(&self, report: &SettlementReport, callback: &GatewayCallback) {
        match &report.outcome {
            SettlementOutcome::OrderNotFound => {
                tracing::warn!(order = %report.order_number, "callback for unknown order");
            }
            SettlementOutcome::AlreadySettled(status) => {
                tracing::info!(
                    order = %report.order_number,
                    status = %status,
                    "order already settled, redelivered callback ignored"
                );
            }
            outcome => {
                tracing::info!(
                    order = %report.order_number,
                    outcome = outcome.as_str(),
                    result = %callback.result,
                    message = %callback.message,
                    decrements = report.decrements.len(),
                    failures = report.failures.len(),
                    "order settled"
                );
            }
        }

        for failure in &report.failures {
            metrics::VARIANT_MATCH_FAILURES
                .with_label_values(&[failure.issue.metric_label()])
                .inc();
            tracing::warn!(
                order = %report.order_number,
                line_item = failure.line_item_id,
                product = failure.product_id,
                name = %failure.name,
                issue = ?failure.issue,
                "stock not decremented for line item"
            );
        }
        if !report.decrements.is_empty() {
            metrics::STOCK_DECREMENTS.inc_by(report.decrements.len() as u64);
        }
    }
}

/// Take stock for one line item. Items without a catalog product are skipped
/// (`Ok(None)`).
fn decrement_line_item(
    conn: &Connection,
    item: &OrderLineItem,
) -> Result<Option<StockDecrement>, VariantMatchFailure> {
    let Some(product_id) = item.product_id else {
        return Ok(None);
    };
    let fail = |issue: LineItemIssue| VariantMatchFailure {
        line_item_id: item.id,
        product_id,
        name: item.name.clone(),
        quantity: item.quantity,
        issue,
    };

    let variants = db::variants_for_product(conn, product_id).map_err(|e| {
        fail(LineItemIssue::DecrementFailed {
            message: e.to_string(),
        })
    })?;

    let variant = variants
        .iter()
        .find(|v| item.attributes.matches_variant(&v.attributes))
        .ok_or_else(|| fail(LineItemIssue::NoMatchingVariant))?;

    match db::decrement_stock(conn, variant.id, item.quantity) {
        Ok(true) => Ok(Some(StockDecrement {
            line_item_id: item.id,
            variant_id: variant.id,
            quantity: item.quantity,
        })),
        Ok(false) => Err(fail(LineItemIssue::InsufficientStock {
            variant_id: variant.id,
            available: variant.stock,
        })),
        Err(e) => Err(fail(LineItemIssue::DecrementFailed {
            message: e.to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewOrder;
    use hpp::signature::{inbound_fields, nested_hash};
    use hpp::{AttributeMap, CartItem, ShippingAddress};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const MERCHANT: &str = "storefront";
    const SECRET: &str = "a-long-enough-shared-secret";

    fn settings() -> GatewaySettings {
        GatewaySettings::sandbox(MERCHANT, "internet", SECRET)
    }

    fn shipping() -> ShippingAddress {
        ShippingAddress {
            first_name: "Ana".to_string(),
            last_name: "García".to_string(),
            address: "Gran Vía 1".to_string(),
            city: "Madrid".to_string(),
            postal_code: "28013".to_string(),
            country: "ES".to_string(),
            phone: "600123456".to_string(),
        }
    }

    fn attrs(pairs: &[(&str, &str)]) -> AttributeMap {
        pairs.iter().copied().collect()
    }

    fn cart_item(product_id: i64, quantity: u32, attributes: AttributeMap) -> CartItem {
        CartItem {
            product_id: Some(product_id),
            name: "Tee".to_string(),
            quantity,
            unit_price: dec!(59.25),
            image: None,
            attributes,
        }
    }

    fn place_order(db: &Database, number: &str, total: Decimal, items: Vec<CartItem>) {
        let new = NewOrder {
            email: "ana@example.com".to_string(),
            user_id: None,
            total,
            provider: hpp::PROVIDER_NAME.to_string(),
            items,
            shipping: shipping(),
        };
        db.insert_order(&new, || number.to_string()).unwrap();
    }

    /// Callback fields signed the way the gateway signs them.
    fn signed_callback(order: &str, result: &str, alg: HashAlgorithm) -> BTreeMap<String, String> {
        let mut fields: BTreeMap<String, String> = [
            ("TIMESTAMP", "20240115103000"),
            ("MERCHANT_ID", MERCHANT),
            ("ORDER_ID", order),
            ("RESULT", result),
            ("MESSAGE", "[ test system ] AUTHORISED"),
            ("PASREF", "14631546336115597"),
            ("AUTHCODE", "12345"),
            ("BATCHID", "445196"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let callback = GatewayCallback::from_fields(fields.clone()).unwrap();
        let digest = nested_hash(alg, &inbound_fields(&callback), SECRET);
        fields.insert(alg.field_name().to_string(), digest);
        fields
    }

    fn handler(db: &Database, policy: SignaturePolicy) -> SettlementHandler {
        SettlementHandler::new(db.clone(), settings(), policy)
    }

    fn stock(db: &Database, variant_id: i64) -> i64 {
        db.get_variant(variant_id).unwrap().unwrap().stock
    }

    #[test]
    fn test_successful_callback_completes_and_redelivery_is_noop() {
        let db = Database::new(":memory:").unwrap();
        let product = db.create_product("Tee", dec!(59.25)).unwrap();
        let red = db
            .create_variant(product.id, &attrs(&[("color", "red"), ("size", "M")]), 10)
            .unwrap();
        place_order(
            &db,
            "AB12CD",
            dec!(123.45),
            vec![cart_item(product.id, 2, attrs(&[("Color", "Red"), ("size", "m")]))],
        );

        let handler = handler(&db, SignaturePolicy::Tolerant);
        let callback = signed_callback("AB12CD", "00", HashAlgorithm::Sha256);

        let first = handler.handle_callback(callback.clone()).unwrap();
        assert_eq!(first.outcome, SettlementOutcome::Completed);
        assert_eq!(
            first.signature,
            Some(SignatureCheck::Verified(HashAlgorithm::Sha256))
        );
        assert_eq!(first.decrements.len(), 1);
        assert_eq!(stock(&db, red.id), 8);

        let order = db.get_order("AB12CD").unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Completed);
        assert_eq!(order.total, dec!(123.45));
        assert_eq!(order.payment_reference.as_deref(), Some("14631546336115597"));
        assert_eq!(order.payment_payload.as_ref(), Some(&callback));

        let second = handler.handle_callback(callback).unwrap();
        assert_eq!(
            second.outcome,
            SettlementOutcome::AlreadySettled(OrderStatus::Completed)
        );
        assert!(second.decrements.is_empty());
        assert_eq!(stock(&db, red.id), 8);
        assert_eq!(
            db.get_order("AB12CD").unwrap().unwrap().status,
            OrderStatus::Completed
        );
    }

    #[test]
    fn test_unmatched_item_does_not_block_settlement() {
        let db = Database::new(":memory:").unwrap();
        let product = db.create_product("Tee", dec!(59.25)).unwrap();
        let red = db
            .create_variant(product.id, &attrs(&[("color", "red")]), 5)
            .unwrap();
        place_order(
            &db,
            "MIX001",
            dec!(30.00),
            vec![
                cart_item(product.id, 1, attrs(&[("color", "red")])),
                cart_item(product.id, 1, attrs(&[("color", "green")])),
            ],
        );

        let report = handler(&db, SignaturePolicy::Tolerant)
            .handle_callback(signed_callback("MIX001", "00", HashAlgorithm::Sha1))
            .unwrap();

        assert_eq!(report.outcome, SettlementOutcome::Completed);
        assert_eq!(report.decrements.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].issue, LineItemIssue::NoMatchingVariant);
        assert_eq!(stock(&db, red.id), 4);
        assert_eq!(
            db.get_order("MIX001").unwrap().unwrap().status,
            OrderStatus::Completed
        );
    }

    #[test]
    fn test_ad_hoc_item_settles_alongside_catalog_item() {
        let db = Database::new(":memory:").unwrap();
        let product = db.create_product("Tee", dec!(59.25)).unwrap();
        let red = db
            .create_variant(product.id, &attrs(&[("color", "red")]), 5)
            .unwrap();
        let gift_wrap = CartItem {
            product_id: None,
            name: "Gift wrap".to_string(),
            quantity: 1,
            unit_price: dec!(2.50),
            image: None,
            attributes: AttributeMap::new(),
        };
        place_order(
            &db,
            "ADH001",
            dec!(66.70),
            vec![cart_item(product.id, 1, attrs(&[("color", "red")])), gift_wrap],
        );

        let report = handler(&db, SignaturePolicy::Tolerant)
            .handle_callback(signed_callback("ADH001", "00", HashAlgorithm::Sha256))
            .unwrap();

        assert_eq!(report.outcome, SettlementOutcome::Completed);
        assert_eq!(report.decrements.len(), 1);
        assert_eq!(report.decrements[0].variant_id, red.id);
        assert!(report.failures.is_empty());
        assert_eq!(stock(&db, red.id), 4);
        assert_eq!(
            db.get_order("ADH001").unwrap().unwrap().status,
            OrderStatus::Completed
        );
    }

    #[test]
    fn test_insufficient_stock_is_reported_not_fatal() {
        let db = Database::new(":memory:").unwrap();
        let product = db.create_product("Cap", dec!(59.25)).unwrap();
        let plain = db.create_variant(product.id, &AttributeMap::new(), 1).unwrap();
        place_order(
            &db,
            "LOW001",
            dec!(30.00),
            vec![cart_item(product.id, 3, AttributeMap::new())],
        );

        let report = handler(&db, SignaturePolicy::Tolerant)
            .handle_callback(signed_callback("LOW001", "00", HashAlgorithm::Sha256))
            .unwrap();

        assert_eq!(report.outcome, SettlementOutcome::Completed);
        assert_eq!(
            report.failures[0].issue,
            LineItemIssue::InsufficientStock {
                variant_id: plain.id,
                available: 1
            }
        );
        assert_eq!(stock(&db, plain.id), 1);
    }

    #[test]
    fn test_declined_payment_fails_order_without_decrement() {
        let db = Database::new(":memory:").unwrap();
        let product = db.create_product("Tee", dec!(59.25)).unwrap();
        let variant = db.create_variant(product.id, &AttributeMap::new(), 5).unwrap();
        place_order(
            &db,
            "DEC001",
            dec!(14.95),
            vec![cart_item(product.id, 1, AttributeMap::new())],
        );

        let report = handler(&db, SignaturePolicy::Tolerant)
            .handle_callback(signed_callback("DEC001", "101", HashAlgorithm::Sha256))
            .unwrap();

        assert_eq!(report.outcome, SettlementOutcome::Failed);
        assert!(report.decrements.is_empty());
        assert_eq!(stock(&db, variant.id), 5);
        assert_eq!(
            db.get_order("DEC001").unwrap().unwrap().status,
            OrderStatus::Failed
        );
    }

    #[test]
    fn test_failed_order_is_terminal() {
        let db = Database::new(":memory:").unwrap();
        place_order(&db, "TRM001", dec!(14.95), vec![]);
        let handler = handler(&db, SignaturePolicy::Tolerant);

        handler
            .handle_callback(signed_callback("TRM001", "205", HashAlgorithm::Sha256))
            .unwrap();
        let late_success = handler
            .handle_callback(signed_callback("TRM001", "00", HashAlgorithm::Sha256))
            .unwrap();

        assert_eq!(
            late_success.outcome,
            SettlementOutcome::AlreadySettled(OrderStatus::Failed)
        );
        assert_eq!(
            db.get_order("TRM001").unwrap().unwrap().status,
            OrderStatus::Failed
        );
    }

    #[test]
    fn test_unknown_order_is_acknowledged() {
        let db = Database::new(":memory:").unwrap();
        let report = handler(&db, SignaturePolicy::Tolerant)
            .handle_callback(signed_callback("NOPE00", "00", HashAlgorithm::Sha256))
            .unwrap();
        assert_eq!(report.outcome, SettlementOutcome::OrderNotFound);
    }

    #[test]
    fn test_tolerant_mode_settles_tampered_callback() {
        let db = Database::new(":memory:").unwrap();
        place_order(&db, "TOL001", dec!(14.95), vec![]);

        let mut callback = signed_callback("TOL001", "00", HashAlgorithm::Sha256);
        callback.insert("AUTHCODE".to_string(), "99999".to_string());

        let report = handler(&db, SignaturePolicy::Tolerant)
            .handle_callback(callback)
            .unwrap();
        assert_eq!(
            report.signature,
            Some(SignatureCheck::Invalid(HashAlgorithm::Sha256))
        );
        assert_eq!(report.outcome, SettlementOutcome::Completed);
        assert_eq!(
            db.get_order("TOL001").unwrap().unwrap().status,
            OrderStatus::Completed
        );
    }

    #[test]
    fn test_strict_mode_rejects_unverified_callbacks() {
        let db = Database::new(":memory:").unwrap();
        place_order(&db, "STR001", dec!(14.95), vec![]);
        let handler = handler(&db, SignaturePolicy::Strict);

        let mut tampered = signed_callback("STR001", "00", HashAlgorithm::Sha256);
        tampered.insert("RESULT".to_string(), "00 ".to_string());
        let report = handler.handle_callback(tampered).unwrap();
        assert!(matches!(report.outcome, SettlementOutcome::Rejected(_)));

        let mut unsigned = signed_callback("STR001", "00", HashAlgorithm::Sha256);
        unsigned.remove("SHA256HASH");
        let report = handler.handle_callback(unsigned).unwrap();
        assert_eq!(report.signature, Some(SignatureCheck::Missing));
        assert!(matches!(report.outcome, SettlementOutcome::Rejected(_)));

        assert_eq!(
            db.get_order("STR001").unwrap().unwrap().status,
            OrderStatus::Pending
        );

        let report = handler
            .handle_callback(signed_callback("STR001", "00", HashAlgorithm::Sha256))
            .unwrap();
        assert_eq!(report.outcome, SettlementOutcome::Completed);
    }

    #[test]
    fn test_malformed_callback_is_rejected() {
        let db = Database::new(":memory:").unwrap();
        let mut fields = signed_callback("MAL001", "00", HashAlgorithm::Sha256);
        fields.remove("RESULT");

        let report = handler(&db, SignaturePolicy::Tolerant)
            .handle_callback(fields)
            .unwrap();
        assert_eq!(report.order_number, "MAL001");
        assert!(matches!(report.outcome, SettlementOutcome::Rejected(_)));
    }

    #[test]
    fn test_display_prefix_is_accepted() {
        let db = Database::new(":memory:").unwrap();
        place_order(&db, "HASH01", dec!(14.95), vec![]);

        let report = handler(&db, SignaturePolicy::Tolerant)
            .handle_callback(signed_callback("#HASH01", "00", HashAlgorithm::Sha256))
            .unwrap();
        assert_eq!(report.order_number, "HASH01");
        assert_eq!(report.outcome, SettlementOutcome::Completed);
    }
}
