//! Stock intake and medication inventory queries.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::entities::{catalogue_medicament, medicament, purchase_record, stock_lot};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::validation::{validate_non_negative, validate_positive};

/// A delivery of one medication.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct ReceiveStockInput {
    #[validate(length(min = 1, max = 255))]
    #[schema(example = "Paracetamol")]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    #[schema(example = "comprime")]
    pub form: String,
    #[validate(custom = "validate_positive")]
    #[schema(value_type = String, example = "500")]
    pub dosage_value: Decimal,
    #[validate(length(min = 1, max = 16))]
    #[schema(example = "mg")]
    pub dosage_unit: String,
    #[validate(length(min = 1, max = 255))]
    pub manufacturer: String,
    #[validate(length(max = 64))]
    pub barcode: Option<String>,
    /// Price charged to patients; becomes the clinic's current price
    #[validate(custom = "validate_positive")]
    #[schema(value_type = String, example = "150")]
    pub sale_price: Decimal,
    #[validate(range(min = 1))]
    pub quantity: i32,
    /// Purchase cost per unit
    #[validate(custom = "validate_non_negative")]
    #[schema(value_type = String, example = "90")]
    pub unit_cost: Decimal,
    pub expiry_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct StockReceipt {
    pub catalogue_id: Uuid,
    pub medicament_id: Uuid,
    pub lot_id: Uuid,
    pub purchase_id: Uuid,
    pub created_catalogue_entry: bool,
    pub created_medicament: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LotView {
    pub id: Uuid,
    pub quantity: i32,
    pub initial_quantity: i32,
    pub expiry_date: NaiveDate,
    pub received_at: DateTime<Utc>,
}

impl From<stock_lot::Model> for LotView {
    fn from(lot: stock_lot::Model) -> Self {
        Self {
            id: lot.id,
            quantity: lot.quantity,
            initial_quantity: lot.initial_quantity,
            expiry_date: lot.expiry_date,
            received_at: lot.received_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MedicationStock {
    pub medicament_id: Uuid,
    pub catalogue_id: Uuid,
    pub name: String,
    pub form: String,
    #[schema(value_type = String)]
    pub dosage_value: Decimal,
    pub dosage_unit: String,
    pub manufacturer: String,
    #[schema(value_type = String)]
    pub sale_price: Decimal,
    pub total_quantity: i64,
    pub next_expiry: Option<NaiveDate>,
    pub lots: Vec<LotView>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MedicationDetail {
    pub catalogue_id: Uuid,
    pub medicament_id: Uuid,
    pub name: String,
    pub form: String,
    #[schema(value_type = String)]
    pub dosage_value: Decimal,
    pub dosage_unit: String,
    pub manufacturer: String,
    pub barcode: Option<String>,
    #[schema(value_type = String)]
    pub sale_price: Decimal,
    #[schema(value_type = String)]
    pub last_unit_cost: Decimal,
    pub last_purchased_at: Option<DateTime<Utc>>,
    pub last_lot_quantity: i32,
    pub last_lot_expiry: Option<NaiveDate>,
}



fn map_insert_err(e: DbErr, what: &str) -> ServiceError {
    match e.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            ServiceError::Conflict(format!("{} was created concurrently; retry", what))
        }
        _ => ServiceError::DatabaseError(e),
    }
}

#[derive(Clone)]
pub struct StockService {
    db: Arc<DatabaseConnection>,
    event_sender: EventSender,
}

impl StockService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: EventSender) -> Self {
        Self { db, event_sender }
    }

    /// Receives a delivery: the catalogue entry and clinic medication are
    /// created on first sight, then a purchase record and a lot are added.
    #[instrument(skip(self, input), fields(clinic_id = %clinic_id, name = %input.name))]
    pub async fn receive_stock(
        &self,
        clinic_id: Uuid,
        input: ReceiveStockInput,
    ) -> Result<StockReceipt, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await.map_err(|e| {
            error!("Failed to begin transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        let receipt = match apply_intake(&txn, clinic_id, &input).await {
            Ok(receipt) => receipt,
            Err(e) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!("Failed to roll back stock intake: {}", rollback_err);
                }
                return Err(e);
            }
        };

        txn.commit().await.map_err(|e| {
            error!("Failed to commit transaction: {}", e);
            ServiceError::DatabaseError(e)
        })?;

        info!(
            medicament_id = %receipt.medicament_id,
            lot_id = %receipt.lot_id,
            quantity = input.quantity,
            "Stock received"
        );
        self.event_sender
            .send_or_log(Event::StockReceived {
                clinic_id,
                medicament_id: receipt.medicament_id,
                lot_id: receipt.lot_id,
                quantity: input.quantity,
            })
            .await;

        Ok(receipt)
    }

    /// Every medication stocked by the clinic with its lots, sorted by name.
    #[instrument(skip(self))]
    pub async fn list_medications(
        &self,
        clinic_id: Uuid,
    ) -> Result<Vec<MedicationStock>, ServiceError> {
        let db = &*self.db;

        let medications = medicament::Entity::find()
            .filter(medicament::Column::ClinicId.eq(clinic_id))
            .find_also_related(catalogue_medicament::Entity)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?;

        let mut lots_by_medication: HashMap<Uuid, Vec<stock_lot::Model>> = HashMap::new();
        for lot in stock_lot::Entity::find()
            .filter(stock_lot::Column::ClinicId.eq(clinic_id))
            .order_by_asc(stock_lot::Column::ExpiryDate)
            .order_by_asc(stock_lot::Column::ReceivedAt)
            .all(db)
            .await
            .map_err(ServiceError::db_error)?
        {
            lots_by_medication
                .entry(lot.medicament_id)
                .or_default()
                .push(lot);
        }

        let mut stock: Vec<MedicationStock> = medications
            .into_iter()
            .filter_map(|(med, catalogue)| catalogue.map(|c| (med, c)))
            .map(|(med, catalogue)| {
                let lots = lots_by_medication.remove(&med.id).unwrap_or_default();
                let total_quantity = lots.iter().map(|lot| i64::from(lot.quantity)).sum();
                let next_expiry = lots
                    .iter()
                    .filter(|lot| lot.quantity > 0)
                    .map(|lot| lot.expiry_date)
                    .min();
                MedicationStock {
                    medicament_id: med.id,
                    catalogue_id: catalogue.id,
                    name: catalogue.name,
                    form: catalogue.form,
                    dosage_value: catalogue.dosage_value,
                    dosage_unit: catalogue.dosage_unit,
                    manufacturer: catalogue.manufacturer,
                    sale_price: med.sale_price,
                    total_quantity,
                    next_expiry,
                    lots: lots.into_iter().map(LotView::from).collect(),
                }
            })
            .collect();

        stock.sort_by(|a, b| a.name.cmp(&b.name).then(a.manufacturer.cmp(&b.manufacturer)));
        Ok(stock)
    }

    /// Detail of one catalogue entry as stocked by the clinic.
    #[instrument(skip(self))]
    pub async fn medication_detail(
        &self,
        clinic_id: Uuid,
        catalogue_id: Uuid,
    ) -> Result<MedicationDetail, ServiceError> {
        let db = &*self.db;

        let not_found =
            || ServiceError::NotFound(format!("Medication {} not found", catalogue_id));

        let catalogue = catalogue_medicament::Entity::find_by_id(catalogue_id)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(not_found)?;

        let med = medicament::Entity::find()
            .filter(medicament::Column::ClinicId.eq(clinic_id))
            .filter(medicament::Column::CatalogueId.eq(catalogue_id))
            .one(db)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(not_found)?;

        let last_purchase = purchase_record::Entity::find()
            .filter(purchase_record::Column::MedicamentId.eq(med.id))
            .order_by_desc(purchase_record::Column::PurchasedAt)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        let last_lot = stock_lot::Entity::find()
            .filter(stock_lot::Column::MedicamentId.eq(med.id))
            .order_by_desc(stock_lot::Column::ReceivedAt)
            .one(db)
            .await
            .map_err(ServiceError::db_error)?;

        Ok(MedicationDetail {
            catalogue_id: catalogue.id,
            medicament_id: med.id,
            name: catalogue.name,
            form: catalogue.form,
            dosage_value: catalogue.dosage_value,
            dosage_unit: catalogue.dosage_unit,
            manufacturer: catalogue.manufacturer,
            barcode: catalogue.barcode,
            sale_price: med.sale_price,
            last_unit_cost: last_purchase
                .as_ref()
                .map(|p| p.unit_cost)
                .unwrap_or(Decimal::ZERO),
            last_purchased_at: last_purchase.map(|p| p.purchased_at),
            last_lot_quantity: last_lot.as_ref().map(|lot| lot.quantity).unwrap_or(0),
            last_lot_expiry: last_lot.map(|lot| lot.expiry_date),
        })
    }
}

async fn apply_intake(
    txn: &DatabaseTransaction,
    clinic_id: Uuid,
    input: &ReceiveStockInput,
) -> Result<StockReceipt, ServiceError> {
    let now = Utc::now();
    let name = input.name.trim();

    let existing_catalogue = catalogue_medicament::Entity::find()
        .filter(catalogue_medicament::Column::Name.eq(name))
        .filter(catalogue_medicament::Column::Form.eq(input.form.trim()))
        .filter(catalogue_medicament::Column::DosageUnit.eq(input.dosage_unit.trim()))
        .filter(catalogue_medicament::Column::Manufacturer.eq(input.manufacturer.trim()))
        .all(txn)
        .await
        .map_err(ServiceError::db_error)?
        .into_iter()
        // Decimal equality ignores scale, unlike a textual comparison in SQL.
        .find(|entry| entry.dosage_value == input.dosage_value);

    let created_catalogue_entry = existing_catalogue.is_none();
    let catalogue = match existing_catalogue {
        Some(entry) => entry,
        None => catalogue_medicament::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            form: Set(input.form.trim().to_string()),
            dosage_value: Set(input.dosage_value),
            dosage_unit: Set(input.dosage_unit.trim().to_string()),
            manufacturer: Set(input.manufacturer.trim().to_string()),
            barcode: Set(input.barcode.clone()),
            created_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(ServiceError::db_error)?,
    };

    let existing_medicament = medicament::Entity::find()
        .filter(medicament::Column::ClinicId.eq(clinic_id))
        .filter(medicament::Column::CatalogueId.eq(catalogue.id))
        .one(txn)
        .await
        .map_err(ServiceError::db_error)?;

    let created_medicament = existing_medicament.is_none();
    let med = match existing_medicament {
        Some(existing) if existing.sale_price == input.sale_price => existing,
        Some(existing) => {
            let mut active: medicament::ActiveModel = existing.into();
            active.sale_price = Set(input.sale_price);
            active.updated_at = Set(now);
            active.update(txn).await.map_err(ServiceError::db_error)?
        }
        None => medicament::ActiveModel {
            id: Set(Uuid::new_v4()),
            clinic_id: Set(clinic_id),
            catalogue_id: Set(catalogue.id),
            sale_price: Set(input.sale_price),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await
        .map_err(|e| map_insert_err(e, "Medication"))?,
    };

    let purchase = purchase_record::ActiveModel {
        id: Set(Uuid::new_v4()),
        clinic_id: Set(clinic_id),
        medicament_id: Set(med.id),
        quantity: Set(input.quantity),
        unit_cost: Set(input.unit_cost),
        purchased_at: Set(now),
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    let lot = stock_lot::ActiveModel {
        id: Set(Uuid::new_v4()),
        clinic_id: Set(clinic_id),
        medicament_id: Set(med.id),
        quantity: Set(input.quantity),
        initial_quantity: Set(input.quantity),
        expiry_date: Set(input.expiry_date),
        received_at: Set(now),
    }
    .insert(txn)
    .await
    .map_err(ServiceError::db_error)?;

    Ok(StockReceipt {
        catalogue_id: catalogue.id,
        medicament_id: med.id,
        lot_id: lot.id,
        purchase_id: purchase.id,
        created_catalogue_entry,
        created_medicament,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn intake() -> ReceiveStockInput {
        ReceiveStockInput {
            name: "Amoxicilline".into(),
            form: "gelule".into(),
            dosage_value: dec!(500),
            dosage_unit: "mg".into(),
            manufacturer: "Sanofi".into(),
            barcode: None,
            sale_price: dec!(1500),
            quantity: 20,
            unit_cost: dec!(900),
            expiry_date: NaiveDate::from_ymd_opt(2031, 6, 30).unwrap(),
        }
    }

    #[test]
    fn well_formed_intake_validates() {
        assert!(intake().validate().is_ok());
    }

    #[test]
    fn zero_sale_price_rejected() {
        let mut input = intake();
        input.sale_price = Decimal::ZERO;
        assert!(input.validate().is_err());
    }

    #[test]
    fn zero_quantity_rejected() {
        let mut input = intake();
        input.quantity = 0;
        assert!(input.validate().is_err());
    }

    #[test]
    fn free_samples_have_zero_cost() {
        let mut input = intake();
        input.unit_cost = Decimal::ZERO;
        assert!(input.validate().is_ok());
        input.unit_cost = dec!(-1);
        assert!(input.validate().is_err());
    }
}
