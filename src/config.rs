//! Application configuration: environment variable loading and validation.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub divvyd: DivvydConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Unset means submission records are kept in process memory only.
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64, // seconds
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Upstream node configuration.
#[derive(Debug, Clone)]
pub struct DivvydConfig {
    pub ws_url: String,
    /// Standalone nodes close ledgers on demand, so freshness checks are
    /// skipped.
    pub standalone: bool,
    pub request_timeout: u64,    // seconds
    pub heartbeat_interval: u64, // seconds
    /// Ledgers past the current one before an unvalidated transaction
    /// expires.
    pub ledger_horizon: u64,
    pub validation_timeout: u64, // seconds
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            divvyd: DivvydConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.divvyd.validate()?;
        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "5990".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }
        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }
        Ok(())
    }
}

impl DivvydConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DivvydConfig {
            ws_url: env::var("DIVVYD_WS_URL").unwrap_or_else(|_| "ws://127.0.0.1:6006".to_string()),
            standalone: env::var("DIVVYD_STANDALONE")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DIVVYD_STANDALONE".to_string()))?,
            request_timeout: env::var("DIVVYD_REQUEST_TIMEOUT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DIVVYD_REQUEST_TIMEOUT".to_string()))?,
            heartbeat_interval: env::var("DIVVYD_HEARTBEAT_INTERVAL")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DIVVYD_HEARTBEAT_INTERVAL".to_string()))?,
            ledger_horizon: env::var("DIVVYD_LEDGER_HORIZON")
                .unwrap_or_else(|_| crate::services::payments::DEFAULT_LEDGER_HORIZON.to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DIVVYD_LEDGER_HORIZON".to_string()))?,
            validation_timeout: env::var("DIVVYD_VALIDATION_TIMEOUT")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DIVVYD_VALIDATION_TIMEOUT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.ws_url.starts_with("ws://") && !self.ws_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "DIVVYD_WS_URL must start with ws:// or wss://".to_string(),
            ));
        }
        if self.request_timeout == 0 {
            return Err(ConfigError::InvalidValue(
                "DIVVYD_REQUEST_TIMEOUT cannot be 0".to_string(),
            ));
        }
        if self.ledger_horizon == 0 {
            return Err(ConfigError::InvalidValue(
                "DIVVYD_LEDGER_HORIZON cannot be 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 5990,
        };
        assert!(config.validate().is_ok());

        let config = ServerConfig {
            host: String::new(),
            port: 5990,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn divvyd_config_requires_ws_scheme() {
        let mut config = DivvydConfig {
            ws_url: "wss://s1.divvy.example:443".to_string(),
            standalone: false,
            request_timeout: 20,
            heartbeat_interval: 15,
            ledger_horizon: 8,
            validation_timeout: 60,
        };
        assert!(config.validate().is_ok());

        config.ws_url = "http://s1.divvy.example".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_horizon_is_rejected() {
        let config = DivvydConfig {
            ws_url: "ws://127.0.0.1:6006".to_string(),
            standalone: true,
            request_timeout: 20,
            heartbeat_interval: 15,
            ledger_horizon: 0,
            validation_timeout: 60,
        };
        assert!(config.validate().is_err());
    }
}
