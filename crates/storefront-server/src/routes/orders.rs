use actix_web::{web, HttpResponse};
use rust_decimal::Decimal;

use hpp::{AttributeMap, OrderStatus};

use crate::error::StoreError;
use crate::state::AppState;

/// Line item as shown on the order status page
#[derive(serde::Serialize)]
pub struct LineItemView {
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
    pub image: Option<String>,
    pub attributes: AttributeMap,
}

/// Public order status (no email, no callback payload)
#[derive(serde::Serialize)]
pub struct OrderView {
    pub order_number: String,
    pub display_number: String,
    pub status: OrderStatus,
    pub total: Decimal,
    pub currency: String,
    pub payment_reference: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub items: Vec<LineItemView>,
}

/// GET /orders/{order_number} - Order status
pub async fn get_order(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, StoreError> {
    let order_number = path.into_inner();
    let number = order_number.trim_start_matches('#');

    let order = state
        .db
        .get_order(number)?
        .ok_or_else(|| StoreError::OrderNotFound(order_number.clone()))?;

    let view = OrderView {
        display_number: order.display_number(),
        order_number: order.order_number,
        status: order.status,
        total: order.total,
        currency: state.config.gateway.currency.clone(),
        payment_reference: order.payment_reference,
        created_at: order.created_at,
        updated_at: order.updated_at,
        items: order
            .items
            .into_iter()
            .map(|item| LineItemView {
                name: item.name,
                quantity: item.quantity,
                unit_price: item.unit_price,
                line_total: item.line_total,
                image: item.image,
                attributes: item.attributes,
            })
            .collect(),
    };

    Ok(HttpResponse::Ok().json(view))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/orders/{order_number}", web::get().to(get_order));
}
