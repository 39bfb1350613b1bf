use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Shared product catalogue. Rows are never mutated once created.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "catalogue_medicaments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub form: String,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub dosage_value: Decimal,
    pub dosage_unit: String,
    pub manufacturer: String,
    pub barcode: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::medicament::Entity")]
    Medicaments,
}

impl Related<super::medicament::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Medicaments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
