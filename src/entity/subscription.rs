use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    pub plan_id: i64,
    pub order_id: i64,
    /// 对外公开的订阅令牌
    #[sea_orm(unique)]
    pub token: String,
    /// 面板客户端的 email 标识，仅在开通失败时为空
    pub identity_email: Option<String>,
    /// 面板客户端 UUID，仅在开通失败时为空
    pub identity_uuid: Option<String>,
    pub traffic_total_gb: i32,
    pub traffic_used_gb: f64,
    pub traffic_remaining_gb: f64,
    /// 为空表示不限时
    pub expires_at: Option<DateTime>,
    pub is_active: bool,
    pub created_at: DateTime,
    pub updated_at: DateTime,
}

impl Model {
    /// 未激活、流量耗尽或已到期均视为过期
    pub fn is_expired(&self, now: DateTime) -> bool {
        if !self.is_active {
            return true;
        }
        if self.traffic_remaining_gb <= 0.0 {
            return true;
        }
        matches!(self.expires_at, Some(expires_at) if expires_at < now)
    }
}

/// 剩余流量 = max(0, 总量 - 已用)
pub fn remaining_gb(total_gb: i32, used_gb: f64) -> f64 {
    (total_gb as f64 - used_gb).max(0.0)
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::user::Entity",
        from = "Column::UserId",
        to = "super::user::Column::Id"
    )]
    User,
    #[sea_orm(
        belongs_to = "super::plan::Entity",
        from = "Column::PlanId",
        to = "super::plan::Column::Id"
    )]
    Plan,
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
    #[sea_orm(has_many = "super::traffic_log::Entity")]
    TrafficLogs,
}

impl Related<super::user::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::User.def()
    }
}

impl Related<super::plan::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Plan.def()
    }
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl Related<super::traffic_log::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TrafficLogs.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
