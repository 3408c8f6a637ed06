//! SeaORM entities for the tables backing the service.

pub mod daily_usage;
pub mod device;
pub mod group_member;
pub mod notification;
pub mod user;
pub mod user_group;
pub mod water_usage;
