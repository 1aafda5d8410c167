//! 订单与履约的领域错误

use axum::http::StatusCode;
use sea_orm::DbErr;
use thiserror::Error;

use crate::entity::OrderStatus;
use crate::panel::PanelError;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("订单不存在")]
    OrderNotFound,

    #[error("套餐不存在")]
    PlanNotFound,

    #[error("套餐已下架")]
    PlanInactive,

    #[error("用户不存在")]
    UserNotFound,

    #[error("订单已完成")]
    AlreadyCompleted,

    #[error("订单状态 {from} 不允许此操作")]
    InvalidTransition { from: OrderStatus },

    #[error("不支持的支付方式: {0}")]
    InvalidPaymentMethod(String),

    #[error("订阅不存在")]
    SubscriptionNotFound,

    /// 只用于必须先完成远程操作的流程，如吊销订阅
    #[error("面板调用失败: {0}")]
    Panel(#[from] PanelError),

    #[error("数据库错误: {0}")]
    Database(#[from] DbErr),
}

impl OrderError {
    /// 对应的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            OrderError::OrderNotFound
            | OrderError::PlanNotFound
            | OrderError::UserNotFound
            | OrderError::SubscriptionNotFound => StatusCode::NOT_FOUND,
            OrderError::PlanInactive
            | OrderError::AlreadyCompleted
            | OrderError::InvalidTransition { .. } => StatusCode::PRECONDITION_FAILED,
            OrderError::InvalidPaymentMethod(_) => StatusCode::BAD_REQUEST,
            OrderError::Panel(_) => StatusCode::BAD_GATEWAY,
            OrderError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(OrderError::OrderNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(OrderError::PlanInactive.status_code(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(
            OrderError::InvalidTransition { from: OrderStatus::Cancelled }.status_code(),
            StatusCode::PRECONDITION_FAILED
        );
        assert_eq!(
            OrderError::InvalidPaymentMethod("paypal".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            OrderError::Panel(PanelError::Unauthorized).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            OrderError::Database(DbErr::Custom("x".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
