pub mod analysis_service;
pub mod auth_service;
pub mod mail_service;
pub mod oauth_service;
