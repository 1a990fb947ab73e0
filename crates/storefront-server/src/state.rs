use crate::config::ServerConfig;
use crate::db::Database;
use crate::ledger::OrderLedger;
use crate::settlement::SettlementHandler;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub db: Database,
    pub ledger: OrderLedger,
    pub settlement: SettlementHandler,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Database) -> Self {
        let ledger = OrderLedger::new(db.clone(), config.shipping_surcharge);
        let settlement =
            SettlementHandler::new(db.clone(), config.gateway.clone(), config.signature_policy);

        Self {
            config: Arc::new(config),
            db,
            ledger,
            settlement,
        }
    }
}
