use crate::error::AppError;
use config::{Config as Cfg, File};
use serde::Deserialize;

/// Settings shared by every service binary.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// OTLP collector for span export. Spans stay local when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            otlp_endpoint: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let config = Cfg::builder()
            .add_source(File::with_name("configuration").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.log_level, "info");
        assert!(config.otlp_endpoint.is_none());
    }
}
