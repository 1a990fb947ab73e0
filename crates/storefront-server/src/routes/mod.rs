use actix_web::web;

pub mod checkout;
pub mod health;
pub mod orders;
pub mod payments;

/// Routes called by the payment gateway and by monitoring. Mounted outside
/// the per-client rate limiter: callbacks all arrive from the gateway's few
/// addresses.
pub fn configure_gateway_facing(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure)
        .configure(payments::configure);
}

/// Customer-facing routes, mounted behind the per-client rate limiter.
pub fn configure_storefront(cfg: &mut web::ServiceConfig) {
    cfg.configure(checkout::configure).configure(orders::configure);
}
