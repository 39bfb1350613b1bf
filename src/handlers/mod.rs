pub mod common;
pub mod reports;
pub mod sales;
pub mod stock;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::{reports::ReportService, sales::SaleService, stock::StockService};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub sales: Arc<SaleService>,
    pub stock: Arc<StockService>,
    pub reports: Arc<ReportService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>, event_sender: EventSender, config: &AppConfig) -> Self {
        Self {
            sales: Arc::new(SaleService::new(
                db_pool.clone(),
                event_sender.clone(),
                config.low_stock_threshold,
            )),
            stock: Arc::new(StockService::new(db_pool.clone(), event_sender)),
            reports: Arc::new(ReportService::new(db_pool, config.low_stock_threshold)),
        }
    }
}
