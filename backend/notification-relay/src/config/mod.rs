use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub auth: AuthConfig,
    pub email: EmailConfig,
    pub relay: RelayConfig,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Directory holding `*.pub` RSA public keys
    pub keys_directory: PathBuf,
}

/// Outbound SMTP gateway settings; `gateway: None` disables email
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub gateway: Option<String>,
    pub port: u16,
    pub from_address: String,
    pub subject: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Liveness probe tick
    pub ping_interval: Duration,
    /// Bounded wait for the `received` acknowledgement
    pub ack_timeout: Duration,
    /// Bound of the intake -> dispatcher queue
    pub queue_capacity: usize,
}

impl AppConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            ack_timeout: Duration::from_millis(1000),
            queue_capacity: 256,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let app = AppConfig {
            host: get("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "PORT", 12345)?,
        };

        let auth = AuthConfig {
            keys_directory: PathBuf::from(
                get("KEYS_DIRECTORY").unwrap_or_else(|| "./keys".to_string()),
            ),
        };

        let email = EmailConfig {
            gateway: get("EMAIL_GATEWAY"),
            port: parse_or(&get, "EMAIL_GATEWAY_PORT", 25)?,
            from_address: get("EMAIL_FROM").unwrap_or_else(|| "noreply@localhost".to_string()),
            subject: get("EMAIL_SUBJECT").unwrap_or_else(|| "Notification".to_string()),
            timeout: Duration::from_secs(parse_or(&get, "EMAIL_TIMEOUT_SECS", 10)?),
        };

        let relay = RelayConfig {
            ping_interval: Duration::from_secs(parse_or(&get, "PING_INTERVAL_SECS", 15)?),
            ack_timeout: Duration::from_millis(parse_or(&get, "ACK_TIMEOUT_MS", 1000)?),
            queue_capacity: parse_or(&get, "QUEUE_CAPACITY", 256)?,
        };

        if relay.ping_interval.is_zero() {
            return Err(AppError::Config("PING_INTERVAL_SECS must be positive".into()));
        }
        if relay.ack_timeout.is_zero() {
            return Err(AppError::Config("ACK_TIMEOUT_MS must be positive".into()));
        }
        if relay.queue_capacity == 0 {
            return Err(AppError::Config("QUEUE_CAPACITY must be positive".into()));
        }

        Ok(Config {
            app,
            auth,
            email,
            relay,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| AppError::Config(format!("{key}: {e}"))),
        None => Ok(default),
    }
}
