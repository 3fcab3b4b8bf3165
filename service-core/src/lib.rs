//! service-core: shared HTTP infrastructure for the attendance service.
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod validation;
