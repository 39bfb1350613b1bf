use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A received quantity of one medication sharing an expiry date.
/// Depleted lots (`quantity == 0`) are kept as history.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_lots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub medicament_id: Uuid,
    pub quantity: i32,
    pub initial_quantity: i32,
    pub expiry_date: NaiveDate,
    pub received_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::medicament::Entity",
        from = "Column::MedicamentId",
        to = "super::medicament::Column::Id"
    )]
    Medicament,
}

impl Related<super::medicament::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Medicament.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
