#![allow(dead_code)]

use attendance_service::config::{AttendanceConfig, MongoConfig, SheetsConfig};
use attendance_service::services::{
    AttendanceService, Forwarder, MemoryStore, StorageLink, WebhookForwarder,
};
use attendance_service::startup::Application;
use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use service_core::config::Config as CoreConfig;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub store: Arc<MemoryStore>,
    pub client: reqwest::Client,
}

#[derive(Default)]
pub struct TestOptions {
    pub webhook_url: Option<String>,
    pub without_storage: bool,
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(TestOptions::default()).await
    }

    pub async fn spawn_with_webhook(url: &str) -> Self {
        Self::spawn_with(TestOptions {
            webhook_url: Some(url.to_string()),
            ..Default::default()
        })
        .await
    }

    pub async fn spawn_with(options: TestOptions) -> Self {
        let config = test_config(&options);
        let store = Arc::new(MemoryStore::new());

        let storage = if options.without_storage {
            StorageLink::NotConfigured
        } else {
            StorageLink::Ready(store.clone())
        };

        let forwarder: Option<Arc<dyn Forwarder>> = options.webhook_url.as_deref().map(|url| {
            Arc::new(WebhookForwarder::new(url).expect("Failed to build forwarder"))
                as Arc<dyn Forwarder>
        });

        let attendance = AttendanceService::new(storage, forwarder, &config.mongodb);
        let app = Application::with_service(config, attendance)
            .await
            .expect("Failed to build test application");

        let port = app.port();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to accept connections
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            store,
            client,
        }
    }

    pub async fn post_attendance(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}/attendance", self.address))
            .json(&body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn get_json(&self, path: &str) -> serde_json::Value {
        self.client
            .get(format!("{}{}", self.address, path))
            .send()
            .await
            .expect("Failed to execute request")
            .json()
            .await
            .expect("Failed to parse JSON")
    }
}

pub fn test_config(options: &TestOptions) -> AttendanceConfig {
    AttendanceConfig {
        common: CoreConfig {
            port: 0,
            ..CoreConfig::default()
        },
        mongodb: if options.without_storage {
            MongoConfig::default()
        } else {
            MongoConfig {
                uri: Some("memory://".to_string()),
                database: Some("attendance_test".to_string()),
            }
        },
        sheets: SheetsConfig {
            webhook_url: options.webhook_url.clone(),
        },
    }
}

/// Stand-in for the spreadsheet web app: answers every POST with a fixed
/// status and keeps the bodies it received.
pub struct WebhookStub {
    pub url: String,
    pub received: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl WebhookStub {
    pub async fn spawn(status: StatusCode) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));

        let router = Router::new()
            .route(
                "/exec",
                post(
                    move |State(received): State<Arc<Mutex<Vec<serde_json::Value>>>>,
                          Json(body): Json<serde_json::Value>| async move {
                        received.lock().unwrap().push(body);
                        status
                    },
                ),
            )
            .with_state(received.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind webhook stub");
        let url = format!("http://{}/exec", listener.local_addr().unwrap());

        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        WebhookStub { url, received }
    }

    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.received.lock().unwrap().clone()
    }
}
