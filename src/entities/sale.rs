use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sales")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub clinic_id: Uuid,
    pub sold_at: DateTime<Utc>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total: Decimal,
    pub payment_mode: PaymentMode,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sale_line::Entity")]
    SaleLines,
}

impl Related<super::sale_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SaleLines.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// How the customer settled the sale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum PaymentMode {
    #[sea_orm(string_value = "ESPECE")]
    #[serde(rename = "ESPECE")]
    Cash,
    #[sea_orm(string_value = "ESPECE_ORANGE_MONEY")]
    #[serde(rename = "ESPECE_ORANGE_MONEY")]
    OrangeMoney,
    #[sea_orm(string_value = "ESPECE_MOOV_MONEY")]
    #[serde(rename = "ESPECE_MOOV_MONEY")]
    MoovMoney,
    #[sea_orm(string_value = "ESPECE_WAVE")]
    #[serde(rename = "ESPECE_WAVE")]
    Wave,
}
