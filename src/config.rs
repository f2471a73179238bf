//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables** — `PORT`, `DATABASE_URL`, `JWT_SECRET`,
//!    `SCROLLBACK_SIZE`, `WORKER_PING_INTERVAL`
//! 2. **Config file** — path via `--config <path>`, or `termhub.toml` in CWD
//! 3. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [server]
//! port = 8082
//! database_url = "sqlite:termhub.db?mode=rwc"
//!
//! [auth]
//! jwt_secret = "your-secret-key"
//!
//! [relay]
//! scrollback_size = 1048576   # bytes per session
//! worker_ping_interval = 30   # seconds
//!
//! [logging]
//! level = "info"
//! ```

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// TCP port to listen on (default 8082). Override with `PORT`.
    #[serde(default = "default_port")]
    pub port: u16,
    /// SQLite connection string. Override with `DATABASE_URL`.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

/// Authentication settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HS256 key for all JWTs. Override with `JWT_SECRET`.
    /// Defaults to a development value which triggers a startup warning.
    #[serde(default = "default_jwt_secret")]
    pub jwt_secret: String,
}

/// Relay hub settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Per-session scrollback cap in bytes (default 1 MiB). Override with
    /// `SCROLLBACK_SIZE`.
    #[serde(default = "default_scrollback_size")]
    pub scrollback_size: usize,
    /// Seconds between worker liveness pings (default 30). Override with
    /// `WORKER_PING_INTERVAL`.
    #[serde(default = "default_worker_ping_interval")]
    pub worker_ping_interval: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_port() -> u16 {
    8082
}
fn default_database_url() -> String {
    "sqlite:termhub.db?mode=rwc".to_string()
}
fn default_jwt_secret() -> String {
    "dev-secret-change-in-production".to_string()
}
fn default_scrollback_size() -> usize {
    1024 * 1024
}
fn default_worker_ping_interval() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            database_url: default_database_url(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: default_jwt_secret(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            scrollback_size: default_scrollback_size(),
            worker_ping_interval: default_worker_ping_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            relay: RelayConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, reads that file (panics on failure). Otherwise
    /// looks for `termhub.toml` in the current directory, falling back to
    /// compiled defaults.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = if let Some(p) = path {
            let content = std::fs::read_to_string(p)
                .unwrap_or_else(|e| panic!("Failed to read config file {p}: {e}"));
            toml::from_str(&content)
                .unwrap_or_else(|e| panic!("Failed to parse config file {p}: {e}"))
        } else if Path::new("termhub.toml").exists() {
            let content =
                std::fs::read_to_string("termhub.toml").expect("Failed to read termhub.toml");
            toml::from_str(&content).expect("Failed to parse termhub.toml")
        } else {
            Config::default()
        };

        // Env var overrides
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.server.database_url = url;
        }
        if let Ok(secret) = std::env::var("JWT_SECRET") {
            config.auth.jwt_secret = secret;
        }
        if let Ok(size) = std::env::var("SCROLLBACK_SIZE") {
            if let Ok(size) = size.parse() {
                config.relay.scrollback_size = size;
            }
        }
        if let Ok(interval) = std::env::var("WORKER_PING_INTERVAL") {
            if let Ok(interval) = interval.parse() {
                config.relay.worker_ping_interval = interval;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.server.port, 8082);
        assert_eq!(config.relay.scrollback_size, 1024 * 1024);
        assert_eq!(config.relay.worker_ping_interval, 30);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let config: Config = toml::from_str(
            r#"
            [relay]
            scrollback_size = 4096
            "#,
        )
        .unwrap();
        assert_eq!(config.relay.scrollback_size, 4096);
        assert_eq!(config.relay.worker_ping_interval, 30);
        assert_eq!(config.server.port, 8082);
    }
}
