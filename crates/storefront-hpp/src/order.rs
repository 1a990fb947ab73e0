//! Order model shared by the ledger, the request builder and settlement.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order lifecycle. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Completed,
    Failed,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}

/// Free-form variant attributes (color, size, ...), stored as captured.
///
/// Comparison goes through [`AttributeMap::canonical`] so key order, key case
/// and value case never affect a match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap(pub BTreeMap<String, String>);

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Trimmed, lowercased keys and values, sorted by key.
    pub fn canonical(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_lowercase()))
            .collect()
    }

    /// True when `variant` carries every attribute of this (line item) map
    /// with the same value. An empty map pairs only with an empty variant.
    pub fn matches_variant(&self, variant: &AttributeMap) -> bool {
        let wanted = self.canonical();
        let offered = variant.canonical();
        if wanted.is_empty() {
            return offered.is_empty();
        }
        wanted
            .iter()
            .all(|(key, value)| offered.get(key) == Some(value))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AttributeMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Shipping address captured at checkout. One per order, immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2
    pub country: String,
    pub phone: String,
}

/// Cart line submitted at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Option<i64>,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl CartItem {
    /// Unit price times quantity, or `None` on overflow.
    pub fn line_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

/// Persisted order line. The unit price is a snapshot taken at purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineItem {
    pub id: i64,
    pub product_id: Option<i64>,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub image: Option<String>,
    pub attributes: AttributeMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_number: String,
    pub email: String,
    pub user_id: Option<i64>,
    pub total: Decimal,
    pub status: OrderStatus,
    pub provider: String,
    pub payment_reference: Option<String>,
    /// Raw settlement callback, kept for audit
    pub payment_payload: Option<BTreeMap<String, String>>,
    pub created_at: i64,
    pub updated_at: i64,
    pub items: Vec<OrderLineItem>,
}

impl Order {
    /// Order number as shown to customers, e.g. `#AB12CD`.
    pub fn display_number(&self) -> String {
        format!("#{}", self.order_number)
    }
}
