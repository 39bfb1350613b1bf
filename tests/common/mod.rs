#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::NaiveDate;
use clinic_pharmacy_api::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        sales::{RecordSaleInput, SaleLineInput},
        stock::{ReceiveStockInput, StockReceipt},
    },
    AppState,
};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_SECRET: &str = "x9Kq2mVb7RtY4nLp8ZcWf3HsJd6GaEu1";

/// Application state backed by a fresh SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub clinic_id: Uuid,
    _event_task: tokio::task::JoinHandle<()>,
    _dir: Option<TempDir>,
}

impl TestApp {
    /// In-memory database. The pool holds a single connection, since every
    /// in-memory connection would otherwise open its own empty database.
    pub async fn new() -> Self {
        Self::with_database("sqlite::memory:".to_string(), 1, None).await
    }

    /// Database file in a temporary directory, shared by `connections`
    /// pooled connections so transactions really run side by side.
    pub async fn on_disk(connections: u32) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!(
            "sqlite://{}?mode=rwc",
            dir.path().join("pharmacy.db").display()
        );
        Self::with_database(url, connections, Some(dir)).await
    }

    async fn with_database(url: String, connections: u32, dir: Option<TempDir>) -> Self {
        let mut cfg = AppConfig::new(
            url,
            TEST_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.cors_allow_any_origin = true;
        cfg.db_max_connections = connections;
        cfg.db_min_connections = 1;
        cfg.low_stock_threshold = 5;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (tx, rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(rx));
        let services = AppServices::new(db_arc.clone(), EventSender::new(tx), &cfg);
        let auth = Arc::new(AuthService::new(AuthConfig::from(&cfg)));

        let state = AppState {
            db: db_arc,
            config: cfg,
            services,
            auth,
        };
        let router = clinic_pharmacy_api::build_router(state.clone()).expect("router");

        Self {
            router,
            state,
            clinic_id: Uuid::new_v4(),
            _event_task: event_task,
            _dir: dir,
        }
    }

    /// Bearer token for the default clinic.
    pub fn token(&self, roles: &[&str]) -> String {
        self.token_for(Some(self.clinic_id), roles)
    }

    pub fn token_for(&self, clinic_id: Option<Uuid>, roles: &[&str]) -> String {
        self.state
            .auth
            .issue_token("staff-test", clinic_id, roles)
            .expect("token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router is infallible");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Receives `quantity` units of `name` expiring on `expiry` for `clinic_id`.
    pub async fn receive(
        &self,
        clinic_id: Uuid,
        name: &str,
        quantity: i32,
        expiry: NaiveDate,
    ) -> StockReceipt {
        self.state
            .services
            .stock
            .receive_stock(clinic_id, intake(name, quantity, expiry))
            .await
            .expect("stock intake")
    }
}

pub fn intake(name: &str, quantity: i32, expiry: NaiveDate) -> ReceiveStockInput {
    ReceiveStockInput {
        name: name.to_string(),
        form: "comprime".to_string(),
        dosage_value: dec!(500),
        dosage_unit: "mg".to_string(),
        manufacturer: "Pharmivoire".to_string(),
        barcode: None,
        sale_price: dec!(100),
        quantity,
        unit_cost: dec!(60),
        expiry_date: expiry,
    }
}

pub fn sale(lines: &[(&str, i32, Decimal)]) -> RecordSaleInput {
    RecordSaleInput {
        lines: lines
            .iter()
            .map(|(name, quantity, unit_price)| SaleLineInput {
                product_name: name.to_string(),
                quantity: *quantity,
                unit_price: *unit_price,
            })
            .collect(),
        payment_mode: clinic_pharmacy_api::entities::sale::PaymentMode::Cash,
    }
}

pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
}
