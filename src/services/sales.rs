//! Sale recording.
//!
//! A sale is one unit of work: the sale row, its lines and every stock lot
//! deduction either commit together or not at all. Lots are consumed
//! earliest-expiry first.

use chrono::{DateTime, NaiveDate, Utc};
use metrics::{counter, histogram};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{
    catalogue_medicament, medicament,
    sale::{self, PaymentMode},
    sale_line, stock_lot,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::validation::validate_non_negative;

/// One requested line of a sale.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SaleLineInput {
    /// Catalogue display name, matched exactly after trimming
    #[validate(length(min = 1, max = 255))]
    #[schema(example = "Paracetamol")]
    pub product_name: String,
    #[validate(range(min = 1))]
    #[schema(example = 2)]
    pub quantity: i32,
    /// Price charged per unit; copied onto the sale line
    #[validate(custom = "validate_non_negative")]
    #[schema(value_type = String, example = "100")]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RecordSaleInput {
    #[validate(length(min = 1, message = "a sale needs at least one line"))]
    pub lines: Vec<SaleLineInput>,
    pub payment_mode: PaymentMode,
}

/// Outcome of a committed sale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SaleReceipt {
    pub sale_id: Uuid,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub sold_at: DateTime<Utc>,
    pub line_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaleSummary {
    pub id: Uuid,
    pub sold_at: DateTime<Utc>,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub payment_mode: PaymentMode,
}

impl From<sale::Model> for SaleSummary {
    fn from(model: sale::Model) -> Self {
        Self {
            id: model.id,
            sold_at: model.sold_at,
            total: model.total,
            payment_mode: model.payment_mode,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaleLineDetail {
    pub medicament_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    #[schema(value_type = String)]
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaleDetail {
    #[serde(flatten)]
    pub sale: SaleSummary,
    pub lines: Vec<SaleLineDetail>,
}

/// Remaining quantity of a lot, in the order lots should be consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotBalance {
    pub lot_id: Uuid,
    pub expiry_date: NaiveDate,
    pub quantity: i32,
}

impl From<&stock_lot::Model> for LotBalance {
    fn from(lot: &stock_lot::Model) -> Self {
        Self {
            lot_id: lot.id,
            expiry_date: lot.expiry_date,
            quantity: lot.quantity,
        }
    }
}

/// Units to take from one lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotDeduction {
    pub lot_id: Uuid,
    pub take: i32,
    pub remaining: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortfall {
    pub requested: i32,
    pub available: i64,
}

/// Plans how `needed` units are taken from `lots`, which must already be in
/// consumption order (earliest expiry first). Each lot gives
/// `min(lot.quantity, still_needed)`; empty lots are skipped. Fails without a
/// partial plan when the lots cannot cover `needed`.
pub fn plan_depletion(lots: &[LotBalance], needed: i32) -> Result<Vec<LotDeduction>, Shortfall> {
    let mut still_needed = needed;
    let mut plan = Vec::new();

    for lot in lots.iter().filter(|lot| lot.quantity > 0) {
        if still_needed == 0 {
            break;
        }
        let take = lot.quantity.min(still_needed);
        plan.push(LotDeduction {
            lot_id: lot.lot_id,
            take,
            remaining: lot.quantity - take,
        });
        still_needed -= take;
    }

    if still_needed > 0 {
        return Err(Shortfall {
            requested: needed,
            available: lots
                .iter()
                .map(|lot| i64::from(lot.quantity.max(0)))
                .sum(),
        });
    }

    Ok(plan)
}


/// Checks the request shape and returns the exact sale total.
pub fn validate_sale_request(input: &RecordSaleInput) -> Result<Decimal, ServiceError> {
    input.validate()?;

    let mut total = Decimal::ZERO;
    for (index, line) in input.lines.iter().enumerate() {
        line.validate()
            .map_err(|e| ServiceError::ValidationError(format!("line {}: {}", index + 1, e)))?;
        if line.product_name.trim().is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "line {}: product_name must not be blank",
                index + 1
            )));
        }
        total = Decimal::from(line.quantity)
            .checked_mul(line.unit_price)
            .and_then(|amount| total.checked_add(amount))
            .ok_or_else(|| ServiceError::ValidationError("sale total overflows".to_string()))?;
    }

    Ok(total)
}

struct LineOutcome {
    deductions: Vec<LotDeduction>,
    medicament_id: Uuid,
}

#[derive(Clone)]
pub struct SaleService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
    low_stock_threshold: i32,
}

impl SaleService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        low_stock_threshold: i32,
    ) -> Self {
        Self {
            db,
            event_sender,
            low_stock_threshold,
        }
    }

    /// Records a sale for `clinic_id`, depleting stock earliest-expiry first.
    ///
    /// Either everything is persisted or nothing is: a failing line rolls back
    /// the sale row, earlier lines and earlier lot deductions.
    #[instrument(skip(self, input), fields(clinic_id = %clinic_id, lines = input.lines.len()))]
    pub async fn record_sale(
        &self,
        clinic_id: Uuid,
        input: RecordSaleInput,
    ) -> Result<SaleReceipt, ServiceError> {
        let started = std::time::Instant::now();

        let result = match validate_sale_request(&input) {
            Ok(total) => self.execute_sale(clinic_id, &input, total).await,
            Err(e) => Err(e),
        };
        histogram!("pharmacy.sales.duration", started.elapsed());

        match result {
            Ok((receipt, outcomes)) => {
                counter!("pharmacy.sales.recorded", 1);
                info!(
                    sale_id = %receipt.sale_id,
                    total = %receipt.total,
                    "Sale recorded"
                );
                self.publish_committed(clinic_id, &receipt, &outcomes).await;
                Ok(receipt)
            }
            Err(e) => {
                counter!("pharmacy.sales.rejected", 1, "code" => e.error_code());
                if e.is_internal() {
                    error!(error = %e, "Sale failed");
                } else {
                    warn!(error = %e, "Sale rejected");
                    self.event_sender
                        .send_or_log(Event::SaleRejected {
                            clinic_id,
                            code: e.error_code().to_string(),
                            reason: e.to_string(),
                        })
                        .await;
                }
                Err(e)
            }
        }
    }

    async fn execute_sale(
        &self,
        clinic_id: Uuid,
        input: &RecordSaleInput,
        total: Decimal,
    ) -> Result<(SaleReceipt, Vec<LineOutcome>), ServiceError> {
        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let sold_at = Utc::now();
        let sale_id = Uuid::new_v4();

        match apply_sale(&txn, clinic_id, sale_id, sold_at, total, input).await {
            Ok(outcomes) => {
                txn.commit().await.map_err(|e| {
                    error!("Failed to commit transaction: {}", e);
                    ServiceError::DatabaseError(e)
                })?;
                let receipt = SaleReceipt {
                    sale_id,
                    total,
                    sold_at,
                    line_count: input.lines.len(),
                };
                Ok((receipt, outcomes))
            }
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!("Failed to roll back sale transaction: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    async fn publish_committed(
        &self,
        clinic_id: Uuid,
        receipt: &SaleReceipt,
        outcomes: &[LineOutcome],
    ) {
        self.event_sender
            .send_or_log(Event::SaleRecorded {
                sale_id: receipt.sale_id,
                clinic_id,
                total: receipt.total,
                line_count: receipt.line_count,
                sold_at: receipt.sold_at,
            })
            .await;

        for outcome in outcomes {
            for deduction in &outcome.deductions {
                if deduction.remaining <= self.low_stock_threshold {
                    self.event_sender
                        .send_or_log(Event::LowStockDetected {
                            clinic_id,
                            medicament_id: outcome.medicament_id,
                            lot_id: deduction.lot_id,
                            remaining: deduction.remaining,
                        })
                        .await;
                }
            }
        }
    }

    /// Fetches one sale of `clinic_id` with its lines.
    #[instrument(skip(self))]
    pub async fn get_sale(&self, clinic_id: Uuid, sale_id: Uuid) -> Result<SaleDetail, ServiceError> {
        let db = &*self.db;

        let sale = sale::Entity::find_by_id(sale_id)
            .filter(sale::Column::ClinicId.eq(clinic_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::NotFound(format!("Sale {} not found", sale_id)))?;

        let lines = sale_line::Entity::find()
            .filter(sale_line::Column::SaleId.eq(sale_id))
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let medicament_ids: Vec<Uuid> = lines.iter().map(|line| line.medicament_id).collect();
        let names: HashMap<Uuid, String> = medicament::Entity::find()
            .filter(medicament::Column::Id.is_in(medicament_ids))
            .find_also_related(catalogue_medicament::Entity)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
            .into_iter()
            .filter_map(|(med, catalogue)| catalogue.map(|c| (med.id, c.name)))
            .collect();

        let lines = lines
            .into_iter()
            .map(|line| SaleLineDetail {
                product_name: names.get(&line.medicament_id).cloned().unwrap_or_default(),
                medicament_id: line.medicament_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
                line_total: Decimal::from(line.quantity) * line.unit_price,
            })
            .collect();

        Ok(SaleDetail {
            sale: sale.into(),
            lines,
        })
    }

    /// Lists sales of `clinic_id`, newest first. `page` is 1-based.
    #[instrument(skip(self))]
    pub async fn list_sales(
        &self,
        clinic_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<SaleSummary>, u64), ServiceError> {
        if page == 0 {
            return Err(ServiceError::ValidationError(
                "Page number must be greater than 0".to_string(),
            ));
        }
        if per_page == 0 || per_page > 100 {
            return Err(ServiceError::ValidationError(
                "per_page must be between 1 and 100".to_string(),
            ));
        }

        let paginator = sale::Entity::find()
            .filter(sale::Column::ClinicId.eq(clinic_id))
            .order_by_desc(sale::Column::SoldAt)
            .order_by_desc(sale::Column::Id)
            .paginate(&*self.db, per_page);

        let total = paginator.num_items().await.map_err(ServiceError::db_error)?;
        let sales = paginator
            .fetch_page(page - 1)
            .await
            .map_err(ServiceError::db_error)?;

        Ok((sales.into_iter().map(SaleSummary::from).collect(), total))
    }
}

async fn apply_sale(
    txn: &DatabaseTransaction,
    clinic_id: Uuid,
    sale_id: Uuid,
    sold_at: DateTime<Utc>,
    total: Decimal,
    input: &RecordSaleInput,
) -> Result<Vec<LineOutcome>, ServiceError> {
    sale::ActiveModel {
        id: Set(sale_id),
        clinic_id: Set(clinic_id),
        sold_at: Set(sold_at),
        total: Set(total),
        payment_mode: Set(input.payment_mode),
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    let mut outcomes = Vec::with_capacity(input.lines.len());
    for line in &input.lines {
        let name = line.product_name.trim();
        let medication = resolve_medication(txn, clinic_id, name).await?;

        sale_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            sale_id: Set(sale_id),
            medicament_id: Set(medication.id),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?;

        let deductions = deplete_stock(txn, clinic_id, medication.id, name, line.quantity).await?;
        outcomes.push(LineOutcome {
            deductions,
            medicament_id: medication.id,
        });
    }

    Ok(outcomes)
}

/// Resolves a display name to the medication stocked by `clinic_id`.
async fn resolve_medication(
    txn: &DatabaseTransaction,
    clinic_id: Uuid,
    name: &str,
) -> Result<medicament::Model, ServiceError> {
    let catalogue_ids: Vec<Uuid> = catalogue_medicament::Entity::find()
        .filter(catalogue_medicament::Column::Name.eq(name))
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        .map(|entry| entry.id)
        .collect();

    if catalogue_ids.is_empty() {
        return Err(ServiceError::ProductNotFound(name.to_string()));
    }

    let mut stocked = medicament::Entity::find()
        .filter(medicament::Column::ClinicId.eq(clinic_id))
        .filter(medicament::Column::CatalogueId.is_in(catalogue_ids))
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?;

    match stocked.len() {
        0 => Err(ServiceError::MedicationNotStocked(name.to_string())),
        1 => Ok(stocked.remove(0)),
        n => Err(ServiceError::ValidationError(format!(
            "product name '{}' is ambiguous: {} stocked medications share it",
            name, n
        ))),
    }
}

/// Locks the medication's non-empty lots and takes `quantity` units from
/// them, earliest expiry first.
async fn deplete_stock(
    txn: &DatabaseTransaction,
    clinic_id: Uuid,
    medicament_id: Uuid,
    name: &str,
    quantity: i32,
) -> Result<Vec<LotDeduction>, ServiceError> {
    // SELECT ... FOR UPDATE on Postgres; SQLite serialises writers instead.
    let lots = stock_lot::Entity::find()
        .filter(stock_lot::Column::ClinicId.eq(clinic_id))
        .filter(stock_lot::Column::MedicamentId.eq(medicament_id))
        .filter(stock_lot::Column::Quantity.gt(0))
        .order_by_asc(stock_lot::Column::ExpiryDate)
        .order_by_asc(stock_lot::Column::ReceivedAt)
        .order_by_asc(stock_lot::Column::Id)
        .lock_exclusive()
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?;

    let balances: Vec<LotBalance> = lots.iter().map(LotBalance::from).collect();
    let plan = plan_depletion(&balances, quantity).map_err(|shortfall| {
        debug!(
            %medicament_id,
            requested = shortfall.requested,
            available = shortfall.available,
            "Not enough stock"
        );
        ServiceError::InsufficientStock(name.to_string())
    })?;

    apply_deductions(txn, &plan).await?;
    Ok(plan)
}

/// Applies planned deductions. A lot that no longer holds the planned units
/// fails with [`ServiceError::ConcurrentModification`].
pub async fn apply_deductions<C: ConnectionTrait>(
    conn: &C,
    plan: &[LotDeduction],
) -> Result<(), ServiceError> {
    for deduction in plan {
        let result = stock_lot::Entity::update_many()
            .col_expr(
                stock_lot::Column::Quantity,
                Expr::col(stock_lot::Column::Quantity).sub(deduction.take),
            )
            .filter(stock_lot::Column::Id.eq(deduction.lot_id))
            .filter(stock_lot::Column::Quantity.gte(deduction.take))
            .exec(conn)
            .await
            .map_err(ServiceError::db_error)?;

        if result.rows_affected != 1 {
            warn!(
                lot_id = %deduction.lot_id,
                take = deduction.take,
                "Lot changed since it was read"
            );
            return Err(ServiceError::ConcurrentModification(deduction.lot_id));
        }
        debug!(
            lot_id = %deduction.lot_id,
            take = deduction.take,
            remaining = deduction.remaining,
            "Lot depleted"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn lot(day: u32, quantity: i32) -> LotBalance {
        LotBalance {
            lot_id: Uuid::new_v4(),
            expiry_date: NaiveDate::from_ymd_opt(2030, 1, day).unwrap(),
            quantity,
        }
    }

    fn line(name: &str, quantity: i32, unit_price: Decimal) -> SaleLineInput {
        SaleLineInput {
            product_name: name.to_string(),
            quantity,
            unit_price,
        }
    }

    #[test]
    fn earliest_lot_drained_before_next() {
        let lots = [lot(1, 5), lot(2, 10)];
        let plan = plan_depletion(&lots, 7).unwrap();
        assert_eq!(
            plan,
            vec![
                LotDeduction {
                    lot_id: lots[0].lot_id,
                    take: 5,
                    remaining: 0
                },
                LotDeduction {
                    lot_id: lots[1].lot_id,
                    take: 2,
                    remaining: 8
                },
            ]
        );
    }

    #[test]
    fn exact_depletion_touches_single_lot() {
        let lots = [lot(1, 4), lot(2, 9)];
        let plan = plan_depletion(&lots, 4).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].remaining, 0);
    }

    #[test]
    fn empty_lots_are_skipped() {
        let lots = [lot(1, 0), lot(2, 3)];
        let plan = plan_depletion(&lots, 2).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].lot_id, lots[1].lot_id);
    }

    #[test]
    fn shortfall_reports_available_total() {
        let lots = [lot(1, 2), lot(2, 3)];
        assert_eq!(
            plan_depletion(&lots, 6),
            Err(Shortfall {
                requested: 6,
                available: 5
            })
        );
        assert_matches!(plan_depletion(&[], 1), Err(Shortfall { available: 0, .. }));
    }

    #[test]
    fn total_is_exact_sum_of_lines() {
        let input = RecordSaleInput {
            lines: vec![line("A", 2, dec!(100)), line("B", 3, dec!(50))],
            payment_mode: PaymentMode::Cash,
        };
        assert_eq!(validate_sale_request(&input).unwrap(), dec!(350));
    }

    #[test]
    fn fractional_prices_keep_exact_total() {
        let input = RecordSaleInput {
            lines: vec![line("A", 3, dec!(0.10)), line("B", 1, dec!(0.20))],
            payment_mode: PaymentMode::Wave,
        };
        assert_eq!(validate_sale_request(&input).unwrap(), dec!(0.50));
    }

    #[test]
    fn empty_sale_rejected() {
        let input = RecordSaleInput {
            lines: vec![],
            payment_mode: PaymentMode::Cash,
        };
        assert_matches!(
            validate_sale_request(&input),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn non_positive_quantity_rejected() {
        for quantity in [0, -3] {
            let input = RecordSaleInput {
                lines: vec![line("A", 1, dec!(5)), line("B", quantity, dec!(5))],
                payment_mode: PaymentMode::Cash,
            };
            let err = validate_sale_request(&input).unwrap_err();
            assert_matches!(&err, ServiceError::ValidationError(msg) if msg.starts_with("line 2"));
        }
    }

    #[test]
    fn negative_price_and_blank_name_rejected() {
        let negative = RecordSaleInput {
            lines: vec![line("A", 1, dec!(-1))],
            payment_mode: PaymentMode::Cash,
        };
        assert_matches!(
            validate_sale_request(&negative),
            Err(ServiceError::ValidationError(_))
        );

        let blank = RecordSaleInput {
            lines: vec![line("   ", 1, dec!(1))],
            payment_mode: PaymentMode::Cash,
        };
        assert_matches!(
            validate_sale_request(&blank),
            Err(ServiceError::ValidationError(_))
        );
    }

    #[test]
    fn free_lines_are_allowed() {
        let input = RecordSaleInput {
            lines: vec![line("Sample", 1, Decimal::ZERO)],
            payment_mode: PaymentMode::Cash,
        };
        assert_eq!(validate_sale_request(&input).unwrap(), Decimal::ZERO);
    }
}
