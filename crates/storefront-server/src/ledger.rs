//! Order creation. The ledger is the only writer of new orders.

use rand::Rng;
use rust_decimal::Decimal;

use hpp::{
    country, decimal_to_minor_units, has_whole_cents, CartItem, Order, PaymentError,
    ShippingAddress, PROVIDER_NAME,
};

use crate::db::{Database, NewOrder};
use crate::error::StoreError;
use crate::metrics;

const ORDER_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const ORDER_NUMBER_LEN: usize = 6;

/// Short, human-readable order number, e.g. `AB12CD`.
pub fn generate_order_number<R: Rng>(rng: &mut R) -> String {
    (0..ORDER_NUMBER_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..ORDER_NUMBER_ALPHABET.len());
            ORDER_NUMBER_ALPHABET[idx] as char
        })
        .collect()
}

/// Subtotal of the cart plus the flat shipping surcharge.
pub fn order_total(cart: &[CartItem], shipping_surcharge: Decimal) -> Result<Decimal, PaymentError> {
    cart.iter().try_fold(shipping_surcharge, |total, item| {
        item.line_total()
            .and_then(|line| total.checked_add(line))
            .ok_or_else(|| PaymentError::InvalidAmount("order total is out of range".to_string()))
    })
}

#[derive(Clone)]
pub struct OrderLedger {
    db: Database,
    shipping_surcharge: Decimal,
}

impl OrderLedger {
    pub fn new(db: Database, shipping_surcharge: Decimal) -> Self {
        Self {
            db,
            shipping_surcharge,
        }
    }

    /// Validate the cart and persist a PENDING order with its line items and
    /// shipping address. Nothing is written unless every part is.
    pub fn create_order(
        &self,
        cart: &[CartItem],
        shipping: &ShippingAddress,
        email: &str,
        user_id: Option<i64>,
    ) -> Result<Order, StoreError> {
        validate_cart(cart)?;
        validate_shipping(shipping)?;

        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(StoreError::InvalidCheckout(
                "a valid email address is required".to_string(),
            ));
        }

        let total = order_total(cart, self.shipping_surcharge)?;
        if total <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(format!(
                "order total must be positive, got {total}"
            ))
            .into());
        }
        // The stored total must be exactly what the gateway will be asked to charge
        decimal_to_minor_units(total)?;

        let new = NewOrder {
            email: email.to_string(),
            user_id,
            total,
            provider: PROVIDER_NAME.to_string(),
            items: cart.to_vec(),
            shipping: shipping.clone(),
        };

        let mut rng = rand::thread_rng();
        let order = self
            .db
            .insert_order(&new, || generate_order_number(&mut rng))?;

        metrics::CHECKOUTS_CREATED.inc();
        tracing::info!(
            order = %order.order_number,
            total = %order.total,
            items = order.items.len(),
            "order created"
        );

        Ok(order)
    }
}

fn validate_cart(cart: &[CartItem]) -> Result<(), StoreError> {
    if cart.is_empty() {
        return Err(StoreError::InvalidCheckout("cart is empty".to_string()));
    }
    for item in cart {
        if item.name.trim().is_empty() {
            return Err(StoreError::InvalidCheckout(
                "every item needs a name".to_string(),
            ));
        }
        if item.quantity == 0 {
            return Err(StoreError::InvalidCheckout(format!(
                "quantity for '{}' must be at least 1",
                item.name
            )));
        }
        if item.unit_price.is_sign_negative() {
            return Err(StoreError::InvalidCheckout(format!(
                "price for '{}' cannot be negative",
                item.name
            )));
        }
        if !has_whole_cents(item.unit_price) {
            return Err(PaymentError::InvalidAmount(format!(
                "price for '{}' has fractional cents: {}",
                item.name, item.unit_price
            ))
            .into());
        }
    }
    Ok(())
}

fn validate_shipping(shipping: &ShippingAddress) -> Result<(), StoreError> {
    let required = [
        ("first name", &shipping.first_name),
        ("last name", &shipping.last_name),
        ("address", &shipping.address),
        ("city", &shipping.city),
        ("postal code", &shipping.postal_code),
        ("country", &shipping.country),
        ("phone", &shipping.phone),
    ];
    for (name, value) in required {
        if value.trim().is_empty() {
            return Err(StoreError::InvalidCheckout(format!(
                "shipping {name} is required"
            )));
        }
    }

    if country::lookup(&shipping.country).is_none() {
        return Err(PaymentError::UnsupportedCountry(shipping.country.clone()).into());
    }
    Ok(())
}
