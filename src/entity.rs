pub mod user;
pub mod plan;
pub mod order;
pub mod subscription;
pub mod traffic_log;

pub use user::Entity as User;
pub use plan::Entity as Plan;
pub use order::Entity as Order;
pub use subscription::Entity as Subscription;
pub use traffic_log::Entity as TrafficLog;

pub use order::OrderStatus;
