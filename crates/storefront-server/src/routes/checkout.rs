use actix_web::{web, HttpResponse};
use serde::Deserialize;
use url::Url;

use hpp::{CartItem, Order, PaymentRequestBuilder, ShippingAddress};

use crate::error::StoreError;
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub items: Vec<CartItem>,
    pub shipping: ShippingAddress,
    pub email: String,
    #[serde(default)]
    pub user_id: Option<i64>,
    /// Landing page after an approved payment; defaults to the configured one
    #[serde(default)]
    pub success_url: Option<String>,
    /// Landing page after a declined payment; defaults to the configured one
    #[serde(default)]
    pub failure_url: Option<String>,
}

/// Order fields safe to show the customer
#[derive(serde::Serialize)]
pub struct OrderSummary {
    pub order_number: String,
    pub display_number: String,
    pub status: hpp::OrderStatus,
    pub total: rust_decimal::Decimal,
    pub currency: String,
    pub item_count: usize,
}

impl OrderSummary {
    pub fn new(order: &Order, currency: &str) -> Self {
        Self {
            order_number: order.order_number.clone(),
            display_number: order.display_number(),
            status: order.status,
            total: order.total,
            currency: currency.to_string(),
            item_count: order.items.len(),
        }
    }
}

/// POST /checkout - Create a PENDING order and the signed hosted-page request
pub async fn create_checkout(
    body: web::Json<CheckoutRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, StoreError> {
    let body = body.into_inner();
    let config = &state.config;

    let success_url = landing_url(body.success_url, &config.success_url, &config.allowed_origins)?;
    let failure_url = landing_url(body.failure_url, &config.failure_url, &config.allowed_origins)?;

    // Fail before writing anything if the gateway cannot be signed for
    let builder = PaymentRequestBuilder::new(&config.gateway)?;

    let order = state
        .ledger
        .create_order(&body.items, &body.shipping, &body.email, body.user_id)?;

    let request = builder.build(&order, &body.shipping, &success_url, &failure_url)?;
    metrics::PAYMENT_REDIRECTS.inc();

    Ok(HttpResponse::Created().json(serde_json::json!({
        "order": OrderSummary::new(&order, &config.gateway.currency),
        "payment": request,
        "redirect_url": format!("/checkout/{}/redirect", order.order_number),
    })))
}

/// GET /checkout/{order_number}/redirect - Auto-submitting form to the hosted page
///
/// Each call signs a fresh request (new timestamp), so a customer can come
/// back to a PENDING order and retry payment.
pub async fn payment_redirect(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, StoreError> {
    let order_number = path.into_inner();
    let config = &state.config;

    let order = state
        .db
        .get_order(&order_number)?
        .ok_or_else(|| StoreError::OrderNotFound(order_number.clone()))?;

    if order.status.is_terminal() {
        return Err(StoreError::OrderAlreadySettled(order_number));
    }

    let shipping = state.db.get_shipping_address(order.id)?.ok_or_else(|| {
        StoreError::Internal(format!("order {} has no shipping address", order_number))
    })?;

    let request = PaymentRequestBuilder::new(&config.gateway)?.build(
        &order,
        &shipping,
        &config.success_url,
        &config.failure_url,
    )?;
    metrics::PAYMENT_REDIRECTS.inc();

    tracing::info!(order = %order_number, "issuing hosted payment redirect");

    Ok(HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .insert_header(("Cache-Control", "no-store"))
        .body(request.to_html_form()))
}

/// Accept a client-supplied landing page only when it points at one of the
/// storefront's own origins.
fn landing_url(
    requested: Option<String>,
    default: &str,
    allowed_origins: &[String],
) -> Result<String, StoreError> {
    let Some(requested) = requested.filter(|s| !s.trim().is_empty()) else {
        return Ok(default.to_string());
    };

    let url = Url::parse(requested.trim())
        .map_err(|_| StoreError::InvalidCheckout(format!("invalid landing URL: {requested}")))?;
    let origin = url.origin().ascii_serialization();

    let default_origin = Url::parse(default).ok().map(|u| u.origin().ascii_serialization());
    let allowed = matches!(url.scheme(), "http" | "https")
        && (default_origin.as_deref() == Some(origin.as_str())
            || allowed_origins.iter().any(|o| o != "*" && *o == origin));

    if !allowed {
        return Err(StoreError::InvalidCheckout(format!(
            "landing URL origin {origin} is not allowed"
        )));
    }
    Ok(url.to_string())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/checkout", web::post().to(create_checkout))
        .route(
            "/checkout/{order_number}/redirect",
            web::get().to(payment_redirect),
        );
}
