//! Hosted payment page (HPP) protocol for the storefront checkout.
//!
//! The customer is redirected to the gateway's hosted page with a signed form;
//! the gateway later POSTs an asynchronous callback that must be verified
//! before the order is settled. Card data never reaches the storefront.
//!
//! # Modules
//!
//! - [`sanitize`] — amounts in minor units, gateway-safe free-text fields
//! - [`signature`] — the two-stage nested hash, SHA-1 and SHA-256
//! - [`request`] — [`PaymentRequestBuilder`] for outbound redirects
//! - [`callback`] — typed [`GatewayCallback`] parsed from the POST body
//! - [`order`] — order, line item, address and attribute types
//!
//! # Quick example
//!
//! ```
//! use hpp::{nested_hash, HashAlgorithm};
//!
//! let parts = ["20240115103000", "merchant", "AB12CD", "12345", "EUR"];
//! let digest = nested_hash(HashAlgorithm::Sha256, &parts, "secret");
//! assert_eq!(digest.len(), 64);
//! ```

pub mod callback;
pub mod constants;
pub mod country;
pub mod error;
pub mod order;
pub mod request;
pub mod sanitize;
pub mod security;
pub mod signature;

pub use callback::GatewayCallback;
pub use constants::*;
pub use error::PaymentError;
pub use order::{AttributeMap, CartItem, Order, OrderLineItem, OrderStatus, ShippingAddress};
pub use request::{PaymentRequest, PaymentRequestBuilder};
pub use sanitize::{decimal_to_minor_units, has_whole_cents, sanitize_field, to_minor_units};
pub use signature::{nested_hash, verify_callback, HashAlgorithm, SignaturePayload};
