use std::collections::BTreeMap;

use actix_web::{web, HttpResponse};

use crate::error::StoreError;
use crate::state::AppState;

/// Flatten a form-encoded body into a field map. A repeated key keeps its
/// last value.
pub fn parse_form_fields(body: &[u8]) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(body).into_owned().collect()
}

/// POST /payments/callback - Gateway settlement notification
///
/// Every handled case is acknowledged with 200 so the gateway stops retrying;
/// only storage failures return 500 (and the retry is safe).
pub async fn payment_callback(
    body: web::Bytes,
    state: web::Data<AppState>,
) -> Result<HttpResponse, StoreError> {
    let fields = parse_form_fields(&body);
    let report = state.settlement.handle_callback(fields)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "received": true,
        "order": report.order_number,
        "outcome": report.outcome.as_str(),
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/payments/callback", web::post().to(payment_callback));
}
