use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One line of a sale. `unit_price` is the price charged, frozen at sale time.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sale_lines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub sale_id: Uuid,
    pub medicament_id: Uuid,
    pub quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Decimal,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sale::Entity",
        from = "Column::SaleId",
        to = "super::sale::Column::Id"
    )]
    Sale,
    #[sea_orm(
        belongs_to = "super::medicament::Entity",
        from = "Column::MedicamentId",
        to = "super::medicament::Column::Id"
    )]
    Medicament,
}

impl Related<super::sale::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sale.def()
    }
}

impl Related<super::medicament::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Medicament.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
