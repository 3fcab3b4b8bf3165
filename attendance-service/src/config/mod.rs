use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

pub const WEBHOOK_URL_VAR: &str = "GOOGLE_SHEETS_WEBAPP_URL";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const DATABASE_NAME_VAR: &str = "DATABASE_NAME";
pub const PORT_VAR: &str = "PORT";

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub mongodb: MongoConfig,
    pub sheets: SheetsConfig,
}

/// Connection settings for the document store. Either field may be missing;
/// the service still starts and runs without persistence.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MongoConfig {
    pub uri: Option<String>,
    pub database: Option<String>,
}

impl MongoConfig {
    /// Storage is used only when both the URI and the database name are set.
    pub fn settings(&self) -> Option<(&str, &str)> {
        match (self.uri.as_deref(), self.database.as_deref()) {
            (Some(uri), Some(database)) => Some((uri, database)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SheetsConfig {
    /// Spreadsheet web app receiving a copy of every record. Never exposed
    /// over HTTP.
    pub webhook_url: Option<String>,
}

impl SheetsConfig {
    pub fn is_enabled(&self) -> bool {
        self.webhook_url.is_some()
    }
}

impl AttendanceConfig {
    pub fn load() -> Result<Self, AppError> {
        // Loads .env and APP__ prefixed settings
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source. Empty values count
    /// as unset.
    pub fn from_lookup<F>(mut common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(port) = get(PORT_VAR) {
            common.port = port.trim().parse().map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("{} is not a valid port: {}", PORT_VAR, e))
            })?;
        }

        Ok(AttendanceConfig {
            common,
            mongodb: MongoConfig {
                uri: get(DATABASE_URL_VAR),
                database: get(DATABASE_NAME_VAR),
            },
            sheets: SheetsConfig {
                webhook_url: get(WEBHOOK_URL_VAR),
            },
        })
    }
}
