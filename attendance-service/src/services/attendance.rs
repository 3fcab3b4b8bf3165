//! Attendance intake: resolve, persist, forward, and report.
//!
//! Storage and the spreadsheet webhook are both treated as optional. A scan
//! is acknowledged whether or not either of them is reachable; what happened
//! downstream is reported in the response instead.

use super::database::{StorageError, StorageLink, ATTENDANCE_COLLECTION};
use super::forwarder::{ForwardOutcome, Forwarder, WebhookForwarder};
use super::{metrics, truncate_chars};
use crate::config::{AttendanceConfig, MongoConfig};
use crate::models::{
    sort_most_recent_first, AttendanceRecord, AttendanceSubmission, StoredAttendance,
};
use chrono::Utc;
use mongodb::bson::doc;
use serde::{Serialize, Serializer};
use service_core::error::AppError;
use std::fmt;
use std::sync::Arc;
use tracing::instrument;

pub const DEFAULT_LIST_LIMIT: i64 = 50;

/// Collections shown by the diagnostics endpoint.
const MAX_LISTED_COLLECTIONS: usize = 10;

/// Longest database error echoed by the diagnostics endpoint.
const DIAGNOSTIC_MESSAGE_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AttendanceService {
    storage: StorageLink,
    forwarder: Option<Arc<dyn Forwarder>>,
    database_url_set: bool,
    database_name_set: bool,
}

/// Everything that happened to one submission.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub record: AttendanceRecord,
    pub stored: Result<String, StorageError>,
    pub forwarded: ForwardOutcome,
}

/// Body returned by `POST /attendance`.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub ok: bool,
    pub id: Option<String>,
    pub forward_to_sheets: ForwardOutcome,
}

impl SubmitOutcome {
    /// Always `ok`; downstream failures only show up as a missing id or an
    /// error forward status.
    pub fn response(&self) -> SubmitResponse {
        SubmitResponse {
            ok: true,
            id: self.stored.as_ref().ok().cloned(),
            forward_to_sheets: self.forwarded.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseStatus {
    NotConfigured,
    /// Settings were present but the client could not be created.
    ConnectionFailed(String),
    Working,
    /// Client exists but the server did not answer a collection listing.
    QueryFailed(String),
}

impl DatabaseStatus {
    fn connection_status(&self) -> &'static str {
        match self {
            DatabaseStatus::NotConfigured => "not configured",
            DatabaseStatus::ConnectionFailed(_) => "not connected",
            DatabaseStatus::Working | DatabaseStatus::QueryFailed(_) => "connected",
        }
    }
}

impl fmt::Display for DatabaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseStatus::NotConfigured => f.write_str("not configured"),
            DatabaseStatus::ConnectionFailed(e) => write!(
                f,
                "connection failed: {}",
                truncate_chars(e, DIAGNOSTIC_MESSAGE_LIMIT)
            ),
            DatabaseStatus::Working => f.write_str("connected & working"),
            DatabaseStatus::QueryFailed(e) => write!(
                f,
                "connected but error: {}",
                truncate_chars(e, DIAGNOSTIC_MESSAGE_LIMIT)
            ),
        }
    }
}

impl Serialize for DatabaseStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Snapshot served by `GET /test`.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub backend: &'static str,
    pub database: DatabaseStatus,
    pub database_url: &'static str,
    pub database_name: &'static str,
    pub connection_status: &'static str,
    pub collections: Vec<String>,
}

fn set_flag(set: bool) -> &'static str {
    if set {
        "set"
    } else {
        "not set"
    }
}

impl AttendanceService {
    /// `settings` only feeds the "set"/"not set" flags in diagnostics.
    pub fn new(
        storage: StorageLink,
        forwarder: Option<Arc<dyn Forwarder>>,
        settings: &MongoConfig,
    ) -> Self {
        Self {
            storage,
            forwarder,
            database_url_set: settings.uri.is_some(),
            database_name_set: settings.database.is_some(),
        }
    }

    /// Wire up storage and forwarding from the loaded configuration. Missing
    /// or unreachable storage is not an error.
    pub async fn from_config(config: &AttendanceConfig) -> Result<Self, AppError> {
        let storage = StorageLink::from_config(&config.mongodb).await;

        let forwarder: Option<Arc<dyn Forwarder>> = match config.sheets.webhook_url.as_deref() {
            Some(url) => {
                let forwarder = WebhookForwarder::new(url)
                    .map_err(|e| AppError::ConfigError(anyhow::anyhow!(e)))?;
                tracing::info!("Spreadsheet forwarding enabled");
                Some(Arc::new(forwarder))
            }
            None => {
                tracing::info!("Spreadsheet webhook not configured, forwarding disabled");
                None
            }
        };

        Ok(Self::new(storage, forwarder, &config.mongodb))
    }

    pub fn forwarding_enabled(&self) -> bool {
        self.forwarder.is_some()
    }

    /// Record one check-in. Never fails: storage and forwarding problems are
    /// carried in the outcome.
    #[instrument(skip(self, submission), fields(id_number = %submission.id_number))]
    pub async fn submit(&self, submission: AttendanceSubmission) -> SubmitOutcome {
        let record = submission.resolve(Utc::now());

        let stored = self.persist(&record).await;
        match &stored {
            Ok(id) => tracing::info!(id = %id, "Attendance recorded"),
            Err(e) => tracing::warn!(error = %e, "Attendance not persisted"),
        }

        let forwarded = self.forward(&record).await;
        if let ForwardOutcome::Failed(e) = &forwarded {
            tracing::warn!(error = %e, "Forwarding to spreadsheet failed");
        }

        metrics::record_submission(stored.is_ok(), &forwarded);

        SubmitOutcome {
            record,
            stored,
            forwarded,
        }
    }

    async fn persist(&self, record: &AttendanceRecord) -> Result<String, StorageError> {
        self.storage
            .store()?
            .insert(ATTENDANCE_COLLECTION, record.to_document())
            .await
    }

    async fn forward(&self, record: &AttendanceRecord) -> ForwardOutcome {
        match &self.forwarder {
            Some(forwarder) => {
                ForwardOutcome::from_result(forwarder.forward(&record.sheets_payload()).await)
            }
            None => ForwardOutcome::Skipped,
        }
    }

    /// Up to `limit` records, newest first. Storage failures yield an empty
    /// list.
    pub async fn list(&self, limit: i64) -> Vec<StoredAttendance> {
        let result = self.try_list(limit).await;
        metrics::record_listing(result.is_ok());

        result.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Listing attendance failed, returning empty result");
            Vec::new()
        })
    }

    pub async fn try_list(&self, limit: i64) -> Result<Vec<StoredAttendance>, StorageError> {
        if limit <= 0 {
            return Ok(Vec::new());
        }

        let documents = self
            .storage
            .store()?
            .find(ATTENDANCE_COLLECTION, doc! {}, limit)
            .await?;

        let mut records: Vec<StoredAttendance> = documents
            .iter()
            .map(StoredAttendance::from_document)
            .collect();
        sort_most_recent_first(&mut records);
        records.truncate(limit as usize);

        Ok(records)
    }

    pub async fn health(&self) -> Diagnostics {
        let (database, collections) = match &self.storage {
            StorageLink::NotConfigured => (DatabaseStatus::NotConfigured, Vec::new()),
            StorageLink::Failed(reason) => {
                (DatabaseStatus::ConnectionFailed(reason.clone()), Vec::new())
            }
            StorageLink::Ready(store) => match store.list_collection_names().await {
                Ok(mut names) => {
                    names.truncate(MAX_LISTED_COLLECTIONS);
                    (DatabaseStatus::Working, names)
                }
                Err(e) => (DatabaseStatus::QueryFailed(e.to_string()), Vec::new()),
            },
        };

        Diagnostics {
            backend: "running",
            connection_status: database.connection_status(),
            database,
            database_url: set_flag(self.database_url_set),
            database_name: set_flag(self.database_name_set),
            collections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SheetsPayload;
    use crate::services::database::{DocumentStore, MemoryStore};
    use crate::services::forwarder::ForwardError;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use mongodb::bson::{DateTime as BsonDateTime, Document};
    use std::sync::Mutex;

    /// Records payloads and answers with a fixed result.
    struct StubForwarder {
        fail_with: Option<String>,
        received: Mutex<Vec<SheetsPayload>>,
    }

    impl StubForwarder {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                fail_with: None,
                received: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                fail_with: Some(message.to_string()),
                received: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Forwarder for StubForwarder {
        async fn forward(&self, payload: &SheetsPayload) -> Result<(), ForwardError> {
            self.received.lock().unwrap().push(payload.clone());
            match &self.fail_with {
                Some(message) => Err(ForwardError::Transport(message.clone())),
                None => Ok(()),
            }
        }
    }

    fn submission() -> AttendanceSubmission {
        AttendanceSubmission {
            name: "Ana".to_string(),
            id_number: "123".to_string(),
            major: "CS".to_string(),
            scanned_at: None,
            source: None,
        }
    }

    fn settings() -> MongoConfig {
        MongoConfig {
            uri: Some("mongodb://localhost:27017".to_string()),
            database: Some("school".to_string()),
        }
    }

    fn service(store: &Arc<MemoryStore>, forwarder: Option<Arc<dyn Forwarder>>) -> AttendanceService {
        AttendanceService::new(StorageLink::Ready(store.clone()), forwarder, &settings())
    }

    #[tokio::test]
    async fn stores_and_forwards() {
        let store = Arc::new(MemoryStore::new());
        let forwarder = StubForwarder::succeeding();
        let service = service(&store, Some(forwarder.clone()));

        let outcome = service.submit(submission()).await;
        let response = outcome.response();

        assert!(response.ok);
        assert_eq!(response.id.as_deref().map(str::len), Some(24));
        assert_eq!(response.forward_to_sheets, ForwardOutcome::Delivered);
        assert_eq!(store.count(ATTENDANCE_COLLECTION), 1);

        let received = forwarder.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].name, "Ana");
        assert_eq!(received[0].source, "qr");
        assert_eq!(received[0].scanned_at, outcome.record.scanned_at.to_rfc3339());
    }

    #[tokio::test]
    async fn missing_scanned_at_resolves_to_processing_time() {
        let store = Arc::new(MemoryStore::new());
        let before = Utc::now();
        let outcome = service(&store, None).submit(submission()).await;
        let after = Utc::now();

        assert!(outcome.record.scanned_at >= before && outcome.record.scanned_at <= after);
    }

    #[tokio::test]
    async fn unparsable_scanned_at_does_not_fail() {
        let store = Arc::new(MemoryStore::new());
        let mut input = submission();
        input.scanned_at = Some("not a date".to_string());

        let before = Utc::now();
        let outcome = service(&store, None).submit(input).await;

        assert!(outcome.stored.is_ok());
        assert!(outcome.record.scanned_at - before < Duration::seconds(5));
    }

    #[tokio::test]
    async fn skipped_without_webhook() {
        let store = Arc::new(MemoryStore::new());
        let outcome = service(&store, None).submit(submission()).await;

        assert_eq!(outcome.forwarded, ForwardOutcome::Skipped);
        assert_eq!(outcome.response().forward_to_sheets.to_string(), "skipped");
    }

    #[tokio::test]
    async fn forward_failure_is_reported_not_raised() {
        let store = Arc::new(MemoryStore::new());
        let long = "connection reset ".repeat(20);
        let service = service(&store, Some(StubForwarder::failing(&long)));

        let response = service.submit(submission()).await.response();
        let status = response.forward_to_sheets.to_string();

        assert!(response.ok);
        assert!(response.id.is_some());
        assert!(status.starts_with("error: connection reset"));
        assert!(status.chars().count() <= 127);
    }

    #[tokio::test]
    async fn storage_outage_still_acknowledges_and_forwards() {
        let store = Arc::new(MemoryStore::new());
        store.set_online(false);
        let forwarder = StubForwarder::succeeding();
        let service = service(&store, Some(forwarder.clone()));

        let outcome = service.submit(submission()).await;

        assert!(matches!(outcome.stored, Err(StorageError::Unavailable(_))));
        assert_eq!(outcome.response().id, None);
        assert!(outcome.response().ok);
        assert_eq!(outcome.forwarded, ForwardOutcome::Delivered);
        assert_eq!(forwarder.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unconfigured_storage_reports_cause() {
        let service = AttendanceService::new(StorageLink::NotConfigured, None, &MongoConfig::default());
        let outcome = service.submit(submission()).await;

        assert_eq!(outcome.stored, Err(StorageError::NotConfigured));
        assert!(service.list(10).await.is_empty());
    }

    #[tokio::test]
    async fn list_returns_newest_first_within_limit() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store, None);
        for name in ["t1", "t2", "t3"] {
            let mut input = submission();
            input.name = name.to_string();
            service.submit(input).await;
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let records = service.list(2).await;
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["t3", "t2"]);

        assert_eq!(service.list(DEFAULT_LIST_LIMIT).await.len(), 3);
        assert!(service.list(0).await.is_empty());
    }

    /// Hands back documents in a fixed order, ignoring sort and limit, to
    /// check the service does its own ordering.
    struct UnorderedStore(Vec<Document>);

    #[async_trait]
    impl DocumentStore for UnorderedStore {
        async fn insert(&self, _: &str, _: Document) -> Result<String, StorageError> {
            Err(StorageError::Rejected("read only".to_string()))
        }

        async fn find(&self, _: &str, _: Document, _: i64) -> Result<Vec<Document>, StorageError> {
            Ok(self.0.clone())
        }

        async fn list_collection_names(&self) -> Result<Vec<String>, StorageError> {
            Ok((0..15).map(|i| format!("collection_{i}")).collect())
        }
    }

    #[tokio::test]
    async fn list_sorts_and_caps_whatever_the_store_returns() {
        let at = |h| BsonDateTime::from_chrono(Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap());
        let store = UnorderedStore(vec![
            doc! { "name": "undated" },
            doc! { "name": "early", "created_at": at(8) },
            doc! { "name": "late", "created_at": at(11) },
            doc! { "name": "middle", "created_at": at(9) },
        ]);
        let service =
            AttendanceService::new(StorageLink::Ready(Arc::new(store)), None, &settings());

        let names: Vec<String> = service.list(3).await.into_iter().map(|r| r.name).collect();
        assert_eq!(names, ["late", "middle", "early"]);

        let names: Vec<String> = service.list(10).await.into_iter().map(|r| r.name).collect();
        assert_eq!(names.last().map(String::as_str), Some("undated"));
    }

    #[tokio::test]
    async fn list_degrades_to_empty_on_outage() {
        let store = Arc::new(MemoryStore::new());
        let service = service(&store, None);
        service.submit(submission()).await;
        store.set_online(false);

        assert!(service.list(DEFAULT_LIST_LIMIT).await.is_empty());
        assert!(service.try_list(DEFAULT_LIST_LIMIT).await.is_err());
    }

    #[tokio::test]
    async fn health_distinguishes_database_states() {
        let health = AttendanceService::new(StorageLink::NotConfigured, None, &MongoConfig::default())
            .health()
            .await;
        assert_eq!(health.database, DatabaseStatus::NotConfigured);
        assert_eq!(health.connection_status, "not configured");
        assert_eq!(health.database_url, "not set");

        let health =
            AttendanceService::new(StorageLink::Failed("bad uri".to_string()), None, &settings())
                .health()
                .await;
        assert_eq!(
            health.database,
            DatabaseStatus::ConnectionFailed("bad uri".to_string())
        );
        assert_eq!(health.connection_status, "not connected");

        let store = Arc::new(MemoryStore::new());
        let service = service(&store, None);
        service.submit(submission()).await;
        let health = service.health().await;
        assert_eq!(health.database, DatabaseStatus::Working);
        assert_eq!(health.collections, [ATTENDANCE_COLLECTION]);
        assert_eq!(health.backend, "running");

        store.set_online(false);
        let health = service.health().await;
        assert!(matches!(health.database, DatabaseStatus::QueryFailed(_)));
        assert_eq!(health.connection_status, "connected");
        assert!(health.collections.is_empty());
    }

    #[tokio::test]
    async fn health_lists_at_most_ten_collections() {
        let service = AttendanceService::new(
            StorageLink::Ready(Arc::new(UnorderedStore(Vec::new()))),
            None,
            &settings(),
        );
        assert_eq!(service.health().await.collections.len(), 10);
    }

    #[tokio::test]
    async fn settings_flags_follow_configuration_not_connection_state() {
        let partial = MongoConfig {
            uri: None,
            database: Some("school".to_string()),
        };
        let health = AttendanceService::new(StorageLink::NotConfigured, None, &partial)
            .health()
            .await;
        assert_eq!(health.database, DatabaseStatus::NotConfigured);
        assert_eq!(health.database_url, "not set");
        assert_eq!(health.database_name, "set");

        let store = Arc::new(MemoryStore::new());
        let health = AttendanceService::new(
            StorageLink::Ready(store),
            None,
            &MongoConfig::default(),
        )
        .health()
        .await;
        assert_eq!(health.database, DatabaseStatus::Working);
        assert_eq!(health.database_url, "not set");
        assert_eq!(health.database_name, "not set");
    }

    #[test]
    fn database_errors_are_truncated_in_diagnostics() {
        let rendered = DatabaseStatus::QueryFailed("y".repeat(200)).to_string();
        assert_eq!(rendered, format!("connected but error: {}", "y".repeat(50)));
    }
}
