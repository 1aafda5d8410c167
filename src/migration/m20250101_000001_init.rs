use sea_orm_migration::prelude::*;
use sea_orm_migration::schema::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 创建 users 表
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(big_integer(Users::Id).auto_increment().primary_key())
                    .col(string_uniq(Users::Email))
                    .col(string(Users::PasswordHash))
                    .col(boolean(Users::IsAdmin).default(false))
                    .col(boolean(Users::IsActive).default(true))
                    .col(timestamp(Users::CreatedAt))
                    .col(timestamp(Users::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // 创建 plans 表（套餐）
        manager
            .create_table(
                Table::create()
                    .table(Plans::Table)
                    .if_not_exists()
                    .col(big_integer(Plans::Id).auto_increment().primary_key())
                    .col(string(Plans::Name))
                    .col(integer(Plans::TrafficGb))
                    .col(double(Plans::Price))
                    .col(string(Plans::Period)) // onetime, 1month, 3month, 6month, 1year
                    .col(boolean(Plans::IsActive).default(true))
                    .col(integer(Plans::SortOrder).default(0))
                    .col(timestamp(Plans::CreatedAt))
                    .col(timestamp(Plans::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        // 创建 orders 表
        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(big_integer(Orders::Id).auto_increment().primary_key())
                    .col(string_uniq(Orders::OrderNumber))
                    .col(big_integer(Orders::UserId))
                    .col(big_integer(Orders::PlanId))
                    .col(double(Orders::Amount))
                    .col(string_len(Orders::Status, 20).default("pending"))
                    .col(string(Orders::Period))
                    .col(timestamp_null(Orders::PaidAt))
                    .col(string_null(Orders::TransactionId))
                    .col(string_null(Orders::PaymentMethod))
                    .col(string_null(Orders::Remark))
                    .col(timestamp(Orders::CreatedAt))
                    .col(timestamp(Orders::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_orders_user")
                            .from(Orders::Table, Orders::UserId)
                            .to(Users::Table, Users::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_orders_plan")
                            .from(Orders::Table, Orders::PlanId)
                            .to(Plans::Table, Plans::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_orders_user_status")
                    .table(Orders::Table)
                    .col(Orders::UserId)
                    .col(Orders::Status)
                    .to_owned(),
            )
            .await?;

        // 创建 subscriptions 表
        manager
            .create_table(
                Table::create()
                    .table(Subscriptions::Table)
                    .if_not_exists()
                    .col(big_integer(Subscriptions::Id).auto_increment().primary_key())
                    .col(big_integer(Subscriptions::UserId))
                    .col(big_integer(Subscriptions::PlanId))
                    .col(big_integer(Subscriptions::OrderId))
                    .col(string_uniq(Subscriptions::Token))
                    .col(string_null(Subscriptions::IdentityEmail))
                    .col(string_null(Subscriptions::IdentityUuid))
                    .col(integer(Subscriptions::TrafficTotalGb))
                    .col(double(Subscriptions::TrafficUsedGb).default(0.0))
                    .col(double(Subscriptions::TrafficRemainingGb))
                    .col(timestamp_null(Subscriptions::ExpiresAt))
                    .col(boolean(Subscriptions::IsActive).default(true))
                    .col(timestamp(Subscriptions::CreatedAt))
                    .col(timestamp(Subscriptions::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_user")
                            .from(Subscriptions::Table, Subscriptions::UserId)
                            .to(Users::Table, Users::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_subscriptions_order")
                            .from(Subscriptions::Table, Subscriptions::OrderId)
                            .to(Orders::Table, Orders::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_user_active")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::UserId)
                    .col(Subscriptions::IsActive)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_subscriptions_identity_email")
                    .table(Subscriptions::Table)
                    .col(Subscriptions::IdentityEmail)
                    .to_owned(),
            )
            .await?;

        // 创建 traffic_logs 表（每日流量快照）
        manager
            .create_table(
                Table::create()
                    .table(TrafficLogs::Table)
                    .if_not_exists()
                    .col(big_integer(TrafficLogs::Id).auto_increment().primary_key())
                    .col(big_integer(TrafficLogs::SubscriptionId))
                    .col(big_integer(TrafficLogs::UploadBytes).default(0))
                    .col(big_integer(TrafficLogs::DownloadBytes).default(0))
                    .col(big_integer(TrafficLogs::TotalBytes).default(0))
                    .col(double(TrafficLogs::RateMultiplier).default(1.0))
                    .col(date(TrafficLogs::RecordedAt))
                    .col(timestamp(TrafficLogs::CreatedAt))
                    .col(timestamp(TrafficLogs::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_traffic_logs_subscription")
                            .from(TrafficLogs::Table, TrafficLogs::SubscriptionId)
                            .to(Subscriptions::Table, Subscriptions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 同一订阅每天只保留一条记录
        manager
            .create_index(
                Index::create()
                    .name("idx_traffic_logs_subscription_date")
                    .table(TrafficLogs::Table)
                    .col(TrafficLogs::SubscriptionId)
                    .col(TrafficLogs::RecordedAt)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TrafficLogs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Subscriptions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Orders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Plans::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Email,
    PasswordHash,
    IsAdmin,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Plans {
    Table,
    Id,
    Name,
    TrafficGb,
    Price,
    Period,
    IsActive,
    SortOrder,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    OrderNumber,
    UserId,
    PlanId,
    Amount,
    Status,
    Period,
    PaidAt,
    TransactionId,
    PaymentMethod,
    Remark,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Subscriptions {
    Table,
    Id,
    UserId,
    PlanId,
    OrderId,
    Token,
    IdentityEmail,
    IdentityUuid,
    TrafficTotalGb,
    TrafficUsedGb,
    TrafficRemainingGb,
    ExpiresAt,
    IsActive,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum TrafficLogs {
    Table,
    Id,
    SubscriptionId,
    UploadBytes,
    DownloadBytes,
    TotalBytes,
    RateMultiplier,
    RecordedAt,
    CreatedAt,
    UpdatedAt,
}
