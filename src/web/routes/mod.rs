pub mod auth_routes;
pub mod device_routes;
pub mod group_routes;
pub mod notification_routes;
pub mod usage_routes;
pub mod user_routes;
