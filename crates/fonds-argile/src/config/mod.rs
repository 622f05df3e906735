use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

use rand::rngs::OsRng;
use rand::RngCore;

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub simulation: SimulationConfig,
    pub validation: ValidationConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let simulation = match env::var("RGA_ENCRYPTION_KEY") {
            Ok(raw) if !raw.trim().is_empty() => SimulationConfig {
                encryption_key: EncryptionSecret::new(raw),
                generated_key: false,
            },
            _ if environment == AppEnvironment::Production => {
                return Err(ConfigError::MissingEncryptionKey)
            }
            _ => SimulationConfig {
                encryption_key: EncryptionSecret::generate(),
                generated_key: true,
            },
        };

        let link_base_url = env::var("VALIDATION_LINK_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"));
        if !(link_base_url.starts_with("http://") || link_base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidLinkBaseUrl(link_base_url));
        }

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            simulation,
            validation: ValidationConfig {
                link_base_url: link_base_url.trim_end_matches('/').to_string(),
            },
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Key material for the simulator hand-off.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub encryption_key: EncryptionSecret,
    /// `true` when no key was configured and a per-process key was generated.
    pub generated_key: bool,
}

/// Settings for the e-mailed AMO decision links.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    pub link_base_url: String,
}

/// Server-side secret. Never printed, never serialized.
#[derive(Clone)]
pub struct EncryptionSecret(String);

impl EncryptionSecret {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes.iter().map(|byte| format!("{byte:02x}")).collect())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EncryptionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionSecret(<redacted>)")
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    MissingEncryptionKey,
    InvalidLinkBaseUrl(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::MissingEncryptionKey => {
                write!(f, "RGA_ENCRYPTION_KEY is required in production")
            }
            ConfigError::InvalidLinkBaseUrl(value) => write!(
                f,
                "VALIDATION_LINK_BASE_URL must be an http(s) URL, got '{}'",
                value
            ),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::InvalidPort
            | ConfigError::MissingEncryptionKey
            | ConfigError::InvalidLinkBaseUrl(_) => None,
        }
    }
}
