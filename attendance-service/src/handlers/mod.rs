//! HTTP handlers for attendance-service.

pub mod attendance;
pub mod health;

pub use attendance::{list_attendance, submit_attendance, ListParams};
pub use health::{diagnostics, health_check, metrics_endpoint, public_config, root};
