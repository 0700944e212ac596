//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub mpesa: MpesaConfig,
    /// Run without Postgres, keeping callback results in memory.
    pub skip_externals: bool,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_allowed_origins: Vec<String>,
    /// Externally reachable base URL, used to derive the M-Pesa callback URL.
    pub public_base_url: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Daraja environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpesaEnvironment {
    Sandbox,
    Production,
}

impl MpesaEnvironment {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            MpesaEnvironment::Sandbox => "https://sandbox.safaricom.co.ke",
            MpesaEnvironment::Production => "https://api.safaricom.co.ke",
        }
    }
}

/// M-Pesa (Daraja) configuration.
///
/// Credentials are optional at load time. The service starts without them and
/// every operation that needs one reports a configuration error instead.
#[derive(Clone)]
pub struct MpesaConfig {
    pub environment: MpesaEnvironment,
    pub base_url: String,
    pub consumer_key: Option<String>,
    pub consumer_secret: Option<String>,
    pub business_shortcode: Option<String>,
    pub passkey: Option<String>,
    pub callback_url: String,
    /// Shown on the payer's handset as both reference and description.
    pub account_reference: String,
    /// Unset means no deadline beyond the HTTP client's own.
    pub timeout_secs: Option<u64>,
    pub max_retries: u32,
}

// Secrets stay out of logs.
impl std::fmt::Debug for MpesaConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpesaConfig")
            .field("environment", &self.environment)
            .field("base_url", &self.base_url)
            .field("consumer_key", &self.consumer_key.as_ref().map(|_| "***"))
            .field("consumer_secret", &self.consumer_secret.as_ref().map(|_| "***"))
            .field("business_shortcode", &self.business_shortcode)
            .field("passkey", &self.passkey.as_ref().map(|_| "***"))
            .field("callback_url", &self.callback_url)
            .field("account_reference", &self.account_reference)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

pub const DEFAULT_ACCOUNT_REFERENCE: &str = "Processing fee";

/// Upper bound for `MPESA_MAX_RETRIES`; backoff doubles per retry.
pub const MAX_PROVIDER_RETRIES: u32 = 5;

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        let skip_externals = env::var("SKIP_EXTERNALS")
            .unwrap_or_else(|_| "false".to_string())
            .to_lowercase()
            == "true";

        let server = ServerConfig::from_env()?;
        let database = if skip_externals {
            DatabaseConfig::unused()
        } else {
            DatabaseConfig::from_env()?
        };

        Ok(AppConfig {
            mpesa: MpesaConfig::from_env(&server.public_base_url)?,
            server,
            database,
            logging: LoggingConfig::from_env()?,
            skip_externals,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        if !self.skip_externals {
            self.database.validate()?;
        }
        self.logging.validate()?;
        self.mpesa.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port: u16 = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?;

        Ok(ServerConfig {
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| format!("http://{}:{}", host, port))
                .trim_end_matches('/')
                .to_string(),
            host,
            port,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
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

    pub fn allows_any_origin(&self) -> bool {
        self.cors_allowed_origins.is_empty() || self.cors_allowed_origins.iter().any(|o| o == "*")
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    fn unused() -> Self {
        DatabaseConfig {
            url: String::new(),
            max_connections: 0,
            min_connections: 0,
            connection_timeout: 0,
            idle_timeout: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .to_lowercase()
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

impl MpesaConfig {
    pub fn from_env(public_base_url: &str) -> Result<Self, ConfigError> {
        let environment = match env::var("MPESA_ENVIRONMENT")
            .unwrap_or_else(|_| "production".to_string())
            .to_lowercase()
            .as_str()
        {
            "sandbox" => MpesaEnvironment::Sandbox,
            "production" | "live" => MpesaEnvironment::Production,
            _ => return Err(ConfigError::InvalidValue("MPESA_ENVIRONMENT".to_string())),
        };

        Ok(MpesaConfig {
            base_url: env::var("MPESA_BASE_URL")
                .unwrap_or_else(|_| environment.default_base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            environment,
            consumer_key: optional_var("MPESA_CONSUMER_KEY"),
            consumer_secret: optional_var("MPESA_CONSUMER_SECRET"),
            business_shortcode: optional_var("MPESA_BUSINESS_SHORTCODE"),
            passkey: optional_var("MPESA_PASSKEY"),
            callback_url: optional_var("MPESA_CALLBACK_URL")
                .unwrap_or_else(|| format!("{}/api/mpesa/callback", public_base_url)),
            account_reference: optional_var("MPESA_ACCOUNT_REFERENCE")
                .unwrap_or_else(|| DEFAULT_ACCOUNT_REFERENCE.to_string()),
            timeout_secs: optional_var("MPESA_TIMEOUT_SECS")
                .map(|v| v.trim().parse())
                .transpose()
                .map_err(|_| ConfigError::InvalidValue("MPESA_TIMEOUT_SECS".to_string()))?,
            max_retries: env::var("MPESA_MAX_RETRIES")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MPESA_MAX_RETRIES".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "MPESA_BASE_URL must be a valid URL".to_string(),
            ));
        }

        if !self.callback_url.starts_with("http://") && !self.callback_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue(
                "MPESA_CALLBACK_URL must be a valid URL".to_string(),
            ));
        }

        if self.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue("MPESA_TIMEOUT_SECS".to_string()));
        }

        if self.max_retries > MAX_PROVIDER_RETRIES {
            return Err(ConfigError::InvalidValue(format!(
                "MPESA_MAX_RETRIES must be <= {}",
                MAX_PROVIDER_RETRIES
            )));
        }

        Ok(())
    }

    /// True when everything needed to talk to Daraja is present.
    pub fn is_complete(&self) -> bool {
        self.consumer_key.is_some()
            && self.consumer_secret.is_some()
            && self.business_shortcode.is_some()
            && self.passkey.is_some()
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}
