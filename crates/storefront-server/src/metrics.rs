use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Checkout counters
pub static CHECKOUTS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "storefront_checkouts_created_total",
        "Total number of orders created at checkout",
    )
    .unwrap()
});

pub static PAYMENT_REDIRECTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "storefront_payment_redirects_total",
        "Total number of signed hosted payment requests issued",
    )
    .unwrap()
});

// Settlement counters
pub static CALLBACKS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "storefront_callbacks_total",
            "Settlement callbacks by outcome",
        ),
        &["outcome"],
    )
    .unwrap()
});

pub static SIGNATURE_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "storefront_signature_failures_total",
            "Callbacks whose signature could not be verified",
        ),
        &["kind"],
    )
    .unwrap()
});

// Inventory counters
pub static STOCK_DECREMENTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "storefront_stock_decrements_total",
        "Variant stock decrements applied on settlement",
    )
    .unwrap()
});

pub static VARIANT_MATCH_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "storefront_variant_match_failures_total",
            "Line items whose stock could not be decremented",
        ),
        &["reason"],
    )
    .unwrap()
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY
            .register(Box::new(CHECKOUTS_CREATED.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(PAYMENT_REDIRECTS.clone()))
            .unwrap();
        REGISTRY.register(Box::new(CALLBACKS_TOTAL.clone())).unwrap();
        REGISTRY
            .register(Box::new(SIGNATURE_FAILURES.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(STOCK_DECREMENTS.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(VARIANT_MATCH_FAILURES.clone()))
            .unwrap();
    });
}
