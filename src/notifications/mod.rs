//! Day-over-day usage notifications: the persisted daily sweep and the live
//! digest shown to a user.

pub mod engine;
pub mod templates;

pub use engine::{DigestEntry, NotificationEngine};
pub use templates::MessageTemplates;
