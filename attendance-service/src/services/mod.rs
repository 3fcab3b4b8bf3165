pub mod attendance;
pub mod database;
pub mod forwarder;
pub mod metrics;

pub use attendance::{
    AttendanceService, DatabaseStatus, Diagnostics, SubmitOutcome, SubmitResponse,
    DEFAULT_LIST_LIMIT,
};
pub use database::{
    DocumentStore, MemoryStore, MongoStore, StorageError, StorageLink, ATTENDANCE_COLLECTION,
};
pub use forwarder::{ForwardError, ForwardOutcome, Forwarder, WebhookForwarder, FORWARD_TIMEOUT};
pub use self::metrics::{get_metrics, init_metrics};

/// First `limit` characters of `message`, never splitting a code point.
pub(crate) fn truncate_chars(message: &str, limit: usize) -> String {
    message.chars().take(limit).collect()
}
