//! Data access for the service. Every function takes the storage handle
//! explicitly; handlers pass `AppState::db_pool`, the notification engine
//! passes its own clone, tests pass an in-memory SQLite connection.

pub mod device_service;
pub mod group_service;
pub mod notification_service;
pub mod usage_service;
pub mod user_service;
