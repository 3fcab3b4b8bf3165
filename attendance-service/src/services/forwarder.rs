use super::truncate_chars;
use crate::models::SheetsPayload;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Serialize, Serializer};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub const FORWARD_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error message echoed back to the caller.
pub const ERROR_MESSAGE_LIMIT: usize = 120;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("{0}")]
    Transport(String),

    #[error("webhook responded with HTTP {0}")]
    Status(reqwest::StatusCode),
}

impl From<reqwest::Error> for ForwardError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ForwardError::Status(status),
            // The webhook URL is a credential; keep it out of messages
            None => ForwardError::Transport(error_chain(&err.without_url())),
        }
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Delivers a copy of each record to the reporting spreadsheet.
#[async_trait]
pub trait Forwarder: Send + Sync {
    async fn forward(&self, payload: &SheetsPayload) -> Result<(), ForwardError>;
}

/// JSON POST to a spreadsheet web app. One attempt, bounded by a timeout.
pub struct WebhookForwarder {
    url: String,
    client: Client,
}

impl WebhookForwarder {
    pub fn new(url: impl Into<String>) -> Result<Self, ForwardError> {
        Self::with_timeout(url, FORWARD_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, ForwardError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ForwardError::Client(e.to_string()))?;

        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Forwarder for WebhookForwarder {
    async fn forward(&self, payload: &SheetsPayload) -> Result<(), ForwardError> {
        self.client
            .post(&self.url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;

        tracing::debug!(id_number = %payload.id_number, "Record forwarded to spreadsheet");
        Ok(())
    }
}

/// What happened to the spreadsheet copy of one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardOutcome {
    /// No webhook configured.
    Skipped,
    Delivered,
    Failed(String),
}

impl ForwardOutcome {
    pub fn from_result(result: Result<(), ForwardError>) -> Self {
        match result {
            Ok(()) => ForwardOutcome::Delivered,
            Err(e) => ForwardOutcome::Failed(e.to_string()),
        }
    }

    /// Low-cardinality label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            ForwardOutcome::Skipped => "skipped",
            ForwardOutcome::Delivered => "ok",
            ForwardOutcome::Failed(_) => "error",
        }
    }
}

impl fmt::Display for ForwardOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardOutcome::Failed(message) => {
                write!(f, "error: {}", truncate_chars(message, ERROR_MESSAGE_LIMIT))
            }
            other => f.write_str(other.label()),
        }
    }
}

impl Serialize for ForwardOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
