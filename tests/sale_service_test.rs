mod common;

use assert_matches::assert_matches;
use clinic_pharmacy_api::{
    entities::{sale, sale_line, stock_lot},
    errors::ServiceError,
    services::sales::{apply_deductions, LotDeduction},
};
use common::{day, intake, sale, TestApp};
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait, TransactionTrait};
use uuid::Uuid;

async fn lot_quantity(app: &TestApp, lot_id: Uuid) -> i32 {
    stock_lot::Entity::find_by_id(lot_id)
        .one(&*app.state.db)
        .await
        .unwrap()
        .expect("lot exists")
        .quantity
}

async fn row_counts(app: &TestApp) -> (u64, u64) {
    let db = &*app.state.db;
    (
        sale::Entity::find().count(db).await.unwrap(),
        sale_line::Entity::find().count(db).await.unwrap(),
    )
}

#[tokio::test]
async fn sale_takes_earliest_expiring_lot_first() {
    let app = TestApp::new().await;
    // Received in reverse expiry order to show receipt order does not matter.
    let later = app.receive(app.clinic_id, "Paracetamol", 10, day(2031, 6, 1)).await;
    let earlier = app.receive(app.clinic_id, "Paracetamol", 5, day(2030, 1, 1)).await;

    let receipt = app
        .state
        .services
        .sales
        .record_sale(app.clinic_id, sale(&[("Paracetamol", 7, dec!(100))]))
        .await
        .unwrap();

    assert_eq!(receipt.total, dec!(700));
    assert_eq!(lot_quantity(&app, earlier.lot_id).await, 0);
    assert_eq!(lot_quantity(&app, later.lot_id).await, 8);
}

#[tokio::test]
async fn exact_depletion_leaves_other_lots_alone() {
    let app = TestApp::new().await;
    let first = app.receive(app.clinic_id, "Ibuprofene", 4, day(2030, 3, 1)).await;
    let second = app.receive(app.clinic_id, "Ibuprofene", 9, day(2030, 9, 1)).await;

    app.state
        .services
        .sales
        .record_sale(app.clinic_id, sale(&[("Ibuprofene", 4, dec!(250))]))
        .await
        .unwrap();

    assert_eq!(lot_quantity(&app, first.lot_id).await, 0);
    assert_eq!(lot_quantity(&app, second.lot_id).await, 9);
}

#[tokio::test]
async fn overdraw_is_rejected_without_side_effects() {
    let app = TestApp::new().await;
    let first = app.receive(app.clinic_id, "Amoxicilline", 3, day(2030, 1, 1)).await;
    let second = app.receive(app.clinic_id, "Amoxicilline", 4, day(2030, 2, 1)).await;

    let err = app
        .state
        .services
        .sales
        .record_sale(app.clinic_id, sale(&[("Amoxicilline", 8, dec!(1500))]))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock(name) if name == "Amoxicilline");
    assert_eq!(lot_quantity(&app, first.lot_id).await, 3);
    assert_eq!(lot_quantity(&app, second.lot_id).await, 4);
    assert_eq!(row_counts(&app).await, (0, 0));
}

#[tokio::test]
async fn total_is_sum_of_line_amounts() {
    let app = TestApp::new().await;
    app.receive(app.clinic_id, "Paracetamol", 10, day(2030, 1, 1)).await;
    app.receive(app.clinic_id, "Ibuprofene", 10, day(2030, 1, 1)).await;

    let receipt = app
        .state
        .services
        .sales
        .record_sale(
            app.clinic_id,
            sale(&[("Paracetamol", 2, dec!(100)), ("Ibuprofene", 3, dec!(50))]),
        )
        .await
        .unwrap();

    assert_eq!(receipt.total, dec!(350));
    assert_eq!(receipt.line_count, 2);

    let stored = app
        .state
        .services
        .sales
        .get_sale(app.clinic_id, receipt.sale_id)
        .await
        .unwrap();
    assert_eq!(stored.sale.total, dec!(350));
    assert_eq!(stored.lines.len(), 2);
}

#[tokio::test]
async fn unknown_product_creates_nothing() {
    let app = TestApp::new().await;
    let lot = app.receive(app.clinic_id, "Paracetamol", 10, day(2030, 1, 1)).await;

    let err = app
        .state
        .services
        .sales
        .record_sale(
            app.clinic_id,
            sale(&[("Paracetamol", 2, dec!(100)), ("Doliprane", 1, dec!(100))]),
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::ProductNotFound(name) if name == "Doliprane");
    assert_eq!(row_counts(&app).await, (0, 0));
    // Line 1 was depleted inside the aborted transaction only.
    assert_eq!(lot_quantity(&app, lot.lot_id).await, 10);
}

#[tokio::test]
async fn product_of_another_clinic_is_not_stocked() {
    let app = TestApp::new().await;
    let other_clinic = Uuid::new_v4();
    let lot = app.receive(other_clinic, "Metformine", 30, day(2030, 1, 1)).await;

    let err = app
        .state
        .services
        .sales
        .record_sale(app.clinic_id, sale(&[("Metformine", 1, dec!(75))]))
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::MedicationNotStocked(_));
    assert_eq!(lot_quantity(&app, lot.lot_id).await, 30);
    assert_eq!(row_counts(&app).await, (0, 0));
}

#[tokio::test]
async fn failing_second_line_restores_first_line_lots() {
    let app = TestApp::new().await;
    let para = app.receive(app.clinic_id, "Paracetamol", 10, day(2030, 1, 1)).await;
    app.receive(app.clinic_id, "Ibuprofene", 1, day(2030, 1, 1)).await;

    let err = app
        .state
        .services
        .sales
        .record_sale(
            app.clinic_id,
            sale(&[("Paracetamol", 6, dec!(100)), ("Ibuprofene", 2, dec!(50))]),
        )
        .await
        .unwrap_err();

    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert_eq!(lot_quantity(&app, para.lot_id).await, 10);
    assert_eq!(row_counts(&app).await, (0, 0));
}

#[tokio::test]
async fn invalid_requests_fail_before_touching_storage() {
    let app = TestApp::new().await;
    app.receive(app.clinic_id, "Paracetamol", 10, day(2030, 1, 1)).await;
    let sales = &app.state.services.sales;

    let empty = sale(&[]);
    assert_matches!(
        sales.record_sale(app.clinic_id, empty).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        sales
            .record_sale(app.clinic_id, sale(&[("Paracetamol", 0, dec!(100))]))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        sales
            .record_sale(app.clinic_id, sale(&[("Paracetamol", 1, dec!(-1))]))
            .await,
        Err(ServiceError::ValidationError(_))
    );
    assert_eq!(row_counts(&app).await, (0, 0));
}

#[tokio::test]
async fn line_price_is_kept_when_catalogue_price_changes() {
    let app = TestApp::new().await;
    app.receive(app.clinic_id, "Paracetamol", 10, day(2030, 1, 1)).await;

    let receipt = app
        .state
        .services
        .sales
        .record_sale(app.clinic_id, sale(&[("Paracetamol", 1, dec!(100))]))
        .await
        .unwrap();

    // A new delivery at a higher price updates the clinic's current price.
    let mut repriced = intake("Paracetamol", 5, day(2031, 1, 1));
    repriced.sale_price = dec!(180);
    app.state
        .services
        .stock
        .receive_stock(app.clinic_id, repriced)
        .await
        .unwrap();

    let stored = app
        .state
        .services
        .sales
        .get_sale(app.clinic_id, receipt.sale_id)
        .await
        .unwrap();
    assert_eq!(stored.lines[0].unit_price, dec!(100));
    assert_eq!(stored.lines[0].product_name, "Paracetamol");
}

#[tokio::test]
async fn name_is_matched_after_trimming() {
    let app = TestApp::new().await;
    let lot = app.receive(app.clinic_id, "Paracetamol", 3, day(2030, 1, 1)).await;

    app.state
        .services
        .sales
        .record_sale(app.clinic_id, sale(&[("  Paracetamol ", 1, dec!(100))]))
        .await
        .unwrap();
    assert_eq!(lot_quantity(&app, lot.lot_id).await, 2);

    // Matching is exact otherwise.
    let err = app
        .state
        .services
        .sales
        .record_sale(app.clinic_id, sale(&[("paracetamol", 1, dec!(100))]))
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::ProductNotFound(_));
}

#[tokio::test]
async fn concurrent_sales_of_the_last_units_both_succeed() {
    let app = TestApp::new().await;
    let lot = app.receive(app.clinic_id, "Paracetamol", 10, day(2030, 1, 1)).await;

    let mut tasks = Vec::new();
    for _ in 0..2 {
        let sales = app.state.services.sales.clone();
        let clinic_id = app.clinic_id;
        tasks.push(tokio::spawn(async move {
            sales
                .record_sale(clinic_id, sale(&[("Paracetamol", 5, dec!(100))]))
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().expect("both sales fit in stock");
    }

    assert_eq!(lot_quantity(&app, lot.lot_id).await, 0);
    assert_eq!(row_counts(&app).await, (2, 2));
}

#[tokio::test]
async fn concurrent_sales_never_oversell() {
    let app = TestApp::new().await;
    let lot = app.receive(app.clinic_id, "Paracetamol", 10, day(2030, 1, 1)).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let sales = app.state.services.sales.clone();
        let clinic_id = app.clinic_id;
        tasks.push(tokio::spawn(async move {
            sales
                .record_sale(clinic_id, sale(&[("Paracetamol", 3, dec!(100))]))
                .await
        }));
    }

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(e) => assert_matches!(e, ServiceError::InsufficientStock(_)),
        }
    }

    assert_eq!(succeeded, 3);
    assert_eq!(lot_quantity(&app, lot.lot_id).await, 1);
}

#[tokio::test]
async fn stale_deduction_plan_is_a_concurrent_modification() {
    let app = TestApp::new().await;
    let lot = app.receive(app.clinic_id, "Paracetamol", 3, day(2030, 1, 1)).await;

    // Planned against 5 units; the lot now holds 3.
    let stale = [LotDeduction {
        lot_id: lot.lot_id,
        take: 5,
        remaining: 0,
    }];
    let err = apply_deductions(&*app.state.db, &stale).await.unwrap_err();

    assert_matches!(err, ServiceError::ConcurrentModification(id) if id == lot.lot_id);
    assert_eq!(lot_quantity(&app, lot.lot_id).await, 3);
}

#[tokio::test]
async fn stale_plan_rolls_back_deductions_already_applied() {
    let app = TestApp::new().await;
    let first = app.receive(app.clinic_id, "Ibuprofene", 4, day(2030, 1, 1)).await;
    let second = app.receive(app.clinic_id, "Ibuprofene", 2, day(2030, 6, 1)).await;

    let plan = [
        LotDeduction {
            lot_id: first.lot_id,
            take: 4,
            remaining: 0,
        },
        LotDeduction {
            lot_id: second.lot_id,
            take: 5,
            remaining: 0,
        },
    ];
    let txn = app.state.db.begin().await.unwrap();
    let err = apply_deductions(&txn, &plan).await.unwrap_err();
    assert_matches!(err, ServiceError::ConcurrentModification(id) if id == second.lot_id);
    txn.rollback().await.unwrap();

    assert_eq!(lot_quantity(&app, first.lot_id).await, 4);
    assert_eq!(lot_quantity(&app, second.lot_id).await, 2);
}

#[tokio::test]
async fn sales_are_scoped_to_their_clinic() {
    let app = TestApp::new().await;
    let other_clinic = Uuid::new_v4();
    app.receive(app.clinic_id, "Paracetamol", 10, day(2030, 1, 1)).await;

    let receipt = app
        .state
        .services
        .sales
        .record_sale(app.clinic_id, sale(&[("Paracetamol", 1, dec!(100))]))
        .await
        .unwrap();

    assert_matches!(
        app.state.services.sales.get_sale(other_clinic, receipt.sale_id).await,
        Err(ServiceError::NotFound(_))
    );
    let (others, total) = app
        .state
        .services
        .sales
        .list_sales(other_clinic, 1, 20)
        .await
        .unwrap();
    assert!(others.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn list_sales_pages_newest_first() {
    let app = TestApp::new().await;
    app.receive(app.clinic_id, "Paracetamol", 10, day(2030, 1, 1)).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let receipt = app
            .state
            .services
            .sales
            .record_sale(app.clinic_id, sale(&[("Paracetamol", 1, dec!(100))]))
            .await
            .unwrap();
        ids.push(receipt.sale_id);
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let sales = &app.state.services.sales;
    let (page_one, total) = sales.list_sales(app.clinic_id, 1, 2).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(page_one.len(), 2);
    assert_eq!(page_one[0].id, ids[2]);

    let (page_two, _) = sales.list_sales(app.clinic_id, 2, 2).await.unwrap();
    assert_eq!(page_two.len(), 1);
    assert_eq!(page_two[0].id, ids[0]);

    assert_matches!(
        sales.list_sales(app.clinic_id, 0, 2).await,
        Err(ServiceError::ValidationError(_))
    );
    assert_matches!(
        sales.list_sales(app.clinic_id, 1, 101).await,
        Err(ServiceError::ValidationError(_))
    );
}
