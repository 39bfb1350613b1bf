use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_catalogue_tables::Migration),
            Box::new(m20240301_000002_create_stock_tables::Migration),
            Box::new(m20240301_000003_create_sales_tables::Migration),
        ]
    }
}

mod m20240301_000001_create_catalogue_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_catalogue_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(CatalogueMedicaments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CatalogueMedicaments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CatalogueMedicaments::Name).string().not_null())
                        .col(ColumnDef::new(CatalogueMedicaments::Form).string().not_null())
                        .col(
                            ColumnDef::new(CatalogueMedicaments::DosageValue)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CatalogueMedicaments::DosageUnit)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CatalogueMedicaments::Manufacturer)
                                .string()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CatalogueMedicaments::Barcode).string())
                        .col(
                            ColumnDef::new(CatalogueMedicaments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_catalogue_medicaments_name")
                        .table(CatalogueMedicaments::Table)
                        .col(CatalogueMedicaments::Name)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(Medicaments::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Medicaments::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Medicaments::ClinicId).uuid().not_null())
                        .col(ColumnDef::new(Medicaments::CatalogueId).uuid().not_null())
                        .col(
                            ColumnDef::new(Medicaments::SalePrice)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Medicaments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Medicaments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_medicaments_catalogue_id")
                                .from(Medicaments::Table, Medicaments::CatalogueId)
                                .to(CatalogueMedicaments::Table, CatalogueMedicaments::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("uq_medicaments_clinic_catalogue")
                        .table(Medicaments::Table)
                        .col(Medicaments::ClinicId)
                        .col(Medicaments::CatalogueId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Medicaments::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(CatalogueMedicaments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum CatalogueMedicaments {
        Table,
        Id,
        Name,
        Form,
        DosageValue,
        DosageUnit,
        Manufacturer,
        Barcode,
        CreatedAt,
    }

    #[derive(DeriveIden)]
    pub enum Medicaments {
        Table,
        Id,
        ClinicId,
        CatalogueId,
        SalePrice,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_stock_tables {

    use super::m20240301_000001_create_catalogue_tables::Medicaments;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_stock_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockLots::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(StockLots::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(StockLots::ClinicId).uuid().not_null())
                        .col(ColumnDef::new(StockLots::MedicamentId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockLots::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(StockLots::Quantity).gte(0)),
                        )
                        .col(
                            ColumnDef::new(StockLots::InitialQuantity)
                                .integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockLots::ExpiryDate).date().not_null())
                        .col(
                            ColumnDef::new(StockLots::ReceivedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_lots_medicament_id")
                                .from(StockLots::Table, StockLots::MedicamentId)
                                .to(Medicaments::Table, Medicaments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_lots_medicament_expiry")
                        .table(StockLots::Table)
                        .col(StockLots::MedicamentId)
                        .col(StockLots::ExpiryDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PurchaseRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseRecords::ClinicId).uuid().not_null())
                        .col(
                            ColumnDef::new(PurchaseRecords::MedicamentId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseRecords::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(PurchaseRecords::UnitCost)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseRecords::PurchasedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_records_medicament_id")
                                .from(PurchaseRecords::Table, PurchaseRecords::MedicamentId)
                                .to(Medicaments::Table, Medicaments::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_records_clinic_purchased_at")
                        .table(PurchaseRecords::Table)
                        .col(PurchaseRecords::ClinicId)
                        .col(PurchaseRecords::PurchasedAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseRecords::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(StockLots::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockLots {
        Table,
        Id,
        ClinicId,
        MedicamentId,
        Quantity,
        InitialQuantity,
        ExpiryDate,
        ReceivedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseRecords {
        Table,
        Id,
        ClinicId,
        MedicamentId,
        Quantity,
        UnitCost,
        PurchasedAt,
    }
}

mod m20240301_000003_create_sales_tables {

    use super::m20240301_000001_create_catalogue_tables::Medicaments;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_sales_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Sales::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Sales::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Sales::ClinicId).uuid().not_null())
                        .col(
                            ColumnDef::new(Sales::SoldAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Sales::Total).decimal_len(16, 4).not_null())
                        .col(ColumnDef::new(Sales::PaymentMode).string_len(32).not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sales_clinic_sold_at")
                        .table(Sales::Table)
                        .col(Sales::ClinicId)
                        .col(Sales::SoldAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(SaleLines::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(SaleLines::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(SaleLines::SaleId).uuid().not_null())
                        .col(ColumnDef::new(SaleLines::MedicamentId).uuid().not_null())
                        .col(
                            ColumnDef::new(SaleLines::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(SaleLines::Quantity).gt(0)),
                        )
                        .col(
                            ColumnDef::new(SaleLines::UnitPrice)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_lines_sale_id")
                                .from(SaleLines::Table, SaleLines::SaleId)
                                .to(Sales::Table, Sales::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_sale_lines_medicament_id")
                                .from(SaleLines::Table, SaleLines::MedicamentId)
                                .to(Medicaments::Table, Medicaments::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_sale_lines_sale_id")
                        .table(SaleLines::Table)
                        .col(SaleLines::SaleId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(SaleLines::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Sales::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Sales {
        Table,
        Id,
        ClinicId,
        SoldAt,
        Total,
        PaymentMode,
    }

    #[derive(DeriveIden)]
    enum SaleLines {
        Table,
        Id,
        SaleId,
        MedicamentId,
        Quantity,
        UnitPrice,
    }
}
