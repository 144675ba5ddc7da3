use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_warehouses_table::Migration),
            Box::new(m20240301_000002_create_products_table::Migration),
            Box::new(m20240301_000003_create_stock_balances_table::Migration),
            Box::new(m20240301_000004_create_stock_movements_table::Migration),
            Box::new(m20240301_000005_create_purchase_orders_table::Migration),
            Box::new(m20240301_000006_create_purchase_order_items_table::Migration),
            Box::new(m20240301_000007_create_activity_logs_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_warehouses_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_warehouses_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Warehouses::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Warehouses::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Warehouses::Code)
                                .string_len(32)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Warehouses::Name).string().not_null())
                        .col(ColumnDef::new(Warehouses::Address).string().null())
                        .col(
                            ColumnDef::new(Warehouses::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Warehouses::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Warehouses::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Warehouses::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Warehouses {
        Table,
        Id,
        Code,
        Name,
        Address,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_products_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Products::Sku).string_len(64).null().unique_key())
                        .col(ColumnDef::new(Products::Barcode).string_len(64).null())
                        .col(ColumnDef::new(Products::Name).string().not_null())
                        .col(
                            ColumnDef::new(Products::Unit)
                                .string_len(16)
                                .not_null()
                                .default("pcs"),
                        )
                        .col(
                            ColumnDef::new(Products::TrackQuantity)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Products::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Products::CostPrice).decimal_len(15, 4).null())
                        .col(
                            ColumnDef::new(Products::SellingPrice)
                                .decimal_len(15, 4)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Products::MinStock)
                                .decimal_len(15, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Products::MaxStock).decimal_len(15, 4).null())
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
        Sku,
        Barcode,
        Name,
        Unit,
        TrackQuantity,
        IsActive,
        CostPrice,
        SellingPrice,
        MinStock,
        MaxStock,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_stock_balances_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_stock_balances_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockBalances::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockBalances::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockBalances::WarehouseId).uuid().not_null())
                        .col(ColumnDef::new(StockBalances::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockBalances::Quantity)
                                .decimal_len(15, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockBalances::ReservedQuantity)
                                .decimal_len(15, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(StockBalances::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(StockBalances::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockBalances::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_balances_warehouse_id")
                                .from(StockBalances::Table, StockBalances::WarehouseId)
                                .to(Warehouses::Table, Warehouses::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_balances_product_id")
                                .from(StockBalances::Table, StockBalances::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("uq_stock_balances_warehouse_product")
                        .table(StockBalances::Table)
                        .col(StockBalances::WarehouseId)
                        .col(StockBalances::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_balances_product_id")
                        .table(StockBalances::Table)
                        .col(StockBalances::ProductId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockBalances::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockBalances {
        Table,
        Id,
        WarehouseId,
        ProductId,
        Quantity,
        ReservedQuantity,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Warehouses {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
    }
}

mod m20240301_000004_create_stock_movements_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_stock_movements_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockMovements::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockMovements::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockMovements::WarehouseId).uuid().not_null())
                        .col(ColumnDef::new(StockMovements::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockMovements::MovementType)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::Quantity)
                                .decimal_len(15, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::UnitCost)
                                .decimal_len(15, 4)
                                .null(),
                        )
                        .col(ColumnDef::new(StockMovements::FromWarehouseId).uuid().null())
                        .col(
                            ColumnDef::new(StockMovements::ReferenceType)
                                .string_len(32)
                                .null(),
                        )
                        .col(ColumnDef::new(StockMovements::ReferenceId).uuid().null())
                        .col(ColumnDef::new(StockMovements::Notes).text().null())
                        .col(ColumnDef::new(StockMovements::UserId).uuid().null())
                        .col(
                            ColumnDef::new(StockMovements::MovementDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockMovements::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_movements_warehouse_id")
                                .from(StockMovements::Table, StockMovements::WarehouseId)
                                .to(Warehouses::Table, Warehouses::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_movements_from_warehouse_id")
                                .from(StockMovements::Table, StockMovements::FromWarehouseId)
                                .to(Warehouses::Table, Warehouses::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_movements_product_id")
                                .from(StockMovements::Table, StockMovements::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_warehouse_date")
                        .table(StockMovements::Table)
                        .col(StockMovements::WarehouseId)
                        .col(StockMovements::MovementDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_product_date")
                        .table(StockMovements::Table)
                        .col(StockMovements::ProductId)
                        .col(StockMovements::MovementDate)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_stock_movements_reference")
                        .table(StockMovements::Table)
                        .col(StockMovements::ReferenceType)
                        .col(StockMovements::ReferenceId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockMovements::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockMovements {
        Table,
        Id,
        WarehouseId,
        ProductId,
        MovementType,
        Quantity,
        UnitCost,
        FromWarehouseId,
        ReferenceType,
        ReferenceId,
        Notes,
        UserId,
        MovementDate,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Warehouses {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
    }
}

mod m20240301_000005_create_purchase_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_purchase_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::OrderNumber)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::SupplierId).uuid().null())
                        .col(ColumnDef::new(PurchaseOrders::WarehouseId).uuid().not_null())
                        .col(
                            ColumnDef::new(PurchaseOrders::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::OrderDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::ExpectedDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::ReceivedDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::Subtotal)
                                .decimal_len(15, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::TaxAmount)
                                .decimal_len(15, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::Total)
                                .decimal_len(15, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(PurchaseOrders::Notes).text().null())
                        .col(ColumnDef::new(PurchaseOrders::CreatedBy).uuid().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_orders_warehouse_id")
                                .from(PurchaseOrders::Table, PurchaseOrders::WarehouseId)
                                .to(Warehouses::Table, Warehouses::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_orders_status")
                        .table(PurchaseOrders::Table)
                        .col(PurchaseOrders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PurchaseOrders {
        Table,
        Id,
        OrderNumber,
        SupplierId,
        WarehouseId,
        Status,
        OrderDate,
        ExpectedDate,
        ReceivedDate,
        Subtotal,
        TaxAmount,
        Total,
        Notes,
        CreatedBy,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum Warehouses {
        Table,
        Id,
    }
}

mod m20240301_000006_create_purchase_order_items_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_purchase_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::ProductId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::Quantity)
                                .decimal_len(15, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::ReceivedQuantity)
                                .decimal_len(15, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::UnitPrice)
                                .decimal_len(15, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::Total)
                                .decimal_len(15, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrderItems::Notes).text().null())
                        .col(
                            ColumnDef::new(PurchaseOrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_order_items_purchase_order_id")
                                .from(
                                    PurchaseOrderItems::Table,
                                    PurchaseOrderItems::PurchaseOrderId,
                                )
                                .to(PurchaseOrders::Table, PurchaseOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_order_items_product_id")
                                .from(PurchaseOrderItems::Table, PurchaseOrderItems::ProductId)
                                .to(Products::Table, Products::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_purchase_order_items_purchase_order_id")
                        .table(PurchaseOrderItems::Table)
                        .col(PurchaseOrderItems::PurchaseOrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseOrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum PurchaseOrderItems {
        Table,
        Id,
        PurchaseOrderId,
        ProductId,
        Quantity,
        ReceivedQuantity,
        UnitPrice,
        Total,
        Notes,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum PurchaseOrders {
        Table,
        Id,
    }

    #[derive(DeriveIden)]
    enum Products {
        Table,
        Id,
    }
}

mod m20240301_000007_create_activity_logs_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000007_create_activity_logs_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ActivityLogs::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ActivityLogs::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ActivityLogs::Action).string_len(64).not_null())
                        .col(ColumnDef::new(ActivityLogs::SubjectType).string_len(64).null())
                        .col(ColumnDef::new(ActivityLogs::SubjectId).uuid().null())
                        .col(ColumnDef::new(ActivityLogs::ProductId).uuid().null())
                        .col(ColumnDef::new(ActivityLogs::OldValues).json().null())
                        .col(ColumnDef::new(ActivityLogs::NewValues).json().null())
                        .col(ColumnDef::new(ActivityLogs::Description).text().null())
                        .col(ColumnDef::new(ActivityLogs::UserId).uuid().null())
                        .col(
                            ColumnDef::new(ActivityLogs::CreatedAt)
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
                        .name("idx_activity_logs_subject")
                        .table(ActivityLogs::Table)
                        .col(ActivityLogs::SubjectType)
                        .col(ActivityLogs::SubjectId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_activity_logs_action")
                        .table(ActivityLogs::Table)
                        .col(ActivityLogs::Action)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ActivityLogs::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum ActivityLogs {
        Table,
        Id,
        Action,
        SubjectType,
        SubjectId,
        ProductId,
        OldValues,
        NewValues,
        Description,
        UserId,
        CreatedAt,
    }
}
