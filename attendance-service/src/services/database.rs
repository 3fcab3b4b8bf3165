use crate::config::MongoConfig;
use crate::models::id_text;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, oid::ObjectId, DateTime as BsonDateTime, Document},
    error::ErrorKind,
    options::{ClientOptions, FindOptions},
    Client as MongoClient, Database,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use thiserror::Error;

pub const ATTENDANCE_COLLECTION: &str = "studentattendance";

/// Upper bound on waiting for a reachable server before an operation fails.
const SERVER_SELECTION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StorageError {
    #[error("storage is not configured")]
    NotConfigured,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage rejected the operation: {0}")]
    Rejected(String),
}

impl From<mongodb::error::Error> for StorageError {
    fn from(err: mongodb::error::Error) -> Self {
        match *err.kind {
            ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
                StorageError::Unavailable(err.to_string())
            }
            _ => StorageError::Rejected(err.to_string()),
        }
    }
}

/// The slice of a document database the service relies on.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert one document and return the identifier the store assigned.
    /// `created_at`/`updated_at` are stamped on the way in.
    async fn insert(&self, collection: &str, document: Document) -> Result<String, StorageError>;

    /// Up to `limit` documents matching `filter`, newest `created_at` first.
    async fn find(
        &self,
        collection: &str,
        filter: Document,
        limit: i64,
    ) -> Result<Vec<Document>, StorageError>;

    async fn list_collection_names(&self) -> Result<Vec<String>, StorageError>;
}

fn stamp(document: &mut Document) {
    let now = BsonDateTime::now();
    document.insert("created_at", now);
    document.insert("updated_at", now);
}

#[derive(Clone)]
pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    /// Build a client for `uri`. The driver connects lazily, so this only
    /// fails on a malformed URI or unusable options.
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StorageError> {
        let mut options = ClientOptions::parse(uri).await.map_err(|e| {
            tracing::error!("Failed to parse MongoDB connection string: {}", e);
            StorageError::from(e)
        })?;
        options.server_selection_timeout = Some(SERVER_SELECTION_TIMEOUT);
        options
            .app_name
            .get_or_insert_with(|| "attendance-service".to_string());

        let client = MongoClient::with_options(options)?;
        let db = client.database(database);
        tracing::info!(database = %database, "MongoDB client initialized");
        Ok(Self { db })
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn insert(
        &self,
        collection: &str,
        mut document: Document,
    ) -> Result<String, StorageError> {
        stamp(&mut document);

        let result = self
            .db
            .collection::<Document>(collection)
            .insert_one(document, None)
            .await
            .map_err(|e| {
                tracing::error!(collection = %collection, "Failed to insert document: {}", e);
                StorageError::from(e)
            })?;

        Ok(id_text(&result.inserted_id))
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        limit: i64,
    ) -> Result<Vec<Document>, StorageError> {
        let find_options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .limit(limit)
            .build();

        let cursor = self
            .db
            .collection::<Document>(collection)
            .find(filter, find_options)
            .await
            .map_err(|e| {
                tracing::error!(collection = %collection, "Failed to query documents: {}", e);
                StorageError::from(e)
            })?;

        let documents: Vec<Document> = cursor.try_collect().await.map_err(|e| {
            tracing::error!(collection = %collection, "Failed to collect documents: {}", e);
            StorageError::from(e)
        })?;

        Ok(documents)
    }

    async fn list_collection_names(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.db.list_collection_names(None).await?)
    }
}

/// In-process store with the same contract as [`MongoStore`]. Can be switched
/// offline to exercise the degraded paths.
pub struct MemoryStore {
    online: AtomicBool,
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            collections: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection)
            .map_or(0, Vec::len)
    }

    fn ensure_online(&self) -> Result<(), StorageError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable(
                "memory store is offline".to_string(),
            ))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| document.get(key) == Some(expected))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(
        &self,
        collection: &str,
        mut document: Document,
    ) -> Result<String, StorageError> {
        self.ensure_online()?;

        if !document.contains_key("_id") {
            document.insert("_id", ObjectId::new());
        }
        stamp(&mut document);
        let id = document.get("_id").map(id_text).unwrap_or_default();

        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection.to_string())
            .or_default()
            .push(document);

        Ok(id)
    }

    async fn find(
        &self,
        collection: &str,
        filter: Document,
        limit: i64,
    ) -> Result<Vec<Document>, StorageError> {
        self.ensure_online()?;

        let collections = self
            .collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        // Reverse insertion order breaks created_at ties in favour of later writes
        let mut documents: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .rev()
                    .filter(|doc| matches_filter(doc, &filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        documents.sort_by(|a, b| {
            b.get_datetime("created_at")
                .ok()
                .cmp(&a.get_datetime("created_at").ok())
        });

        // Same semantics as the driver: zero means no limit
        if limit != 0 {
            documents.truncate(limit.unsigned_abs() as usize);
        }

        Ok(documents)
    }

    async fn list_collection_names(&self) -> Result<Vec<String>, StorageError> {
        self.ensure_online()?;
        let mut names: Vec<String> = self
            .collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        Ok(names)
    }
}

/// Startup outcome for the storage connection, kept distinct so diagnostics
/// can tell "never configured" from "configured but broken".
#[derive(Clone)]
pub enum StorageLink {
    NotConfigured,
    Failed(String),
    Ready(Arc<dyn DocumentStore>),
}

impl StorageLink {
    pub async fn from_config(config: &MongoConfig) -> Self {
        let Some((uri, database)) = config.settings() else {
            tracing::info!("Database settings not provided, running without persistence");
            return StorageLink::NotConfigured;
        };

        match MongoStore::connect(uri, database).await {
            Ok(store) => StorageLink::Ready(Arc::new(store)),
            Err(e) => {
                tracing::warn!("Database unavailable, running without persistence: {}", e);
                StorageLink::Failed(e.to_string())
            }
        }
    }

    pub fn store(&self) -> Result<&Arc<dyn DocumentStore>, StorageError> {
        match self {
            StorageLink::Ready(store) => Ok(store),
            StorageLink::NotConfigured => Err(StorageError::NotConfigured),
            StorageLink::Failed(reason) => Err(StorageError::Unavailable(reason.clone())),
        }
    }
}
