//! Layered configuration: compiled defaults, `config/default.toml`,
//! `config/{environment}.toml`, `BOTADMIN_*` variables and `DATABASE_URL`.

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ENV_PREFIX: &str = "BOTADMIN_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Reads `BOTADMIN_ENV`, falling back to development.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(format!("{ENV_PREFIX}ENV")) {
            Ok(value) => value.parse(),
            Err(_) => Ok(Self::default()),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "test" => Ok(Self::Test),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::Invalid(format!("unknown environment '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatfuelConfig {
    /// Shared key the chat platform sends as `?key=`.
    pub key: String,
    pub certificate_service_url: String,
    pub certificate_template: String,
    /// Block the bot is sent back to when the certificate image is unusable.
    pub certificate_retry_block: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_minutes: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// Minutes east of UTC used for creation-date buckets.
    pub tz_offset_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrudConfig {
    pub max_limit: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub chatfuel: ChatfuelConfig,
    pub auth: AuthConfig,
    pub reporting: ReportingConfig,
    pub crud: CrudConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/botadmin".into(),
                max_connections: 10,
            },
            chatfuel: ChatfuelConfig {
                key: String::new(),
                certificate_service_url: "http://localhost:8090".into(),
                certificate_template: "default".into(),
                certificate_retry_block: "Certificate image".into(),
            },
            auth: AuthConfig {
                jwt_secret: String::new(),
                token_ttl_minutes: 720,
            },
            reporting: ReportingConfig {
                tz_offset_minutes: 420,
            },
            crud: CrudConfig { max_limit: 1000 },
        }
    }
}

impl AppConfig {
    pub fn figment(environment: Environment) -> Figment {
        let defaults = AppConfig {
            environment,
            ..AppConfig::default()
        };
        Figment::from(Serialized::defaults(defaults))
            .merge(Toml::file("config/default.toml"))
            .merge(Toml::file(format!("config/{environment}.toml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__").ignore(&["env"]))
            .merge(
                Env::raw()
                    .only(&["database_url"])
                    .map(|_| "database.url".into()),
            )
    }

    pub fn load_for(environment: Environment) -> Result<Self, ConfigError> {
        let mut config: AppConfig = Self::figment(environment)
            .extract()
            .map_err(Box::new)?;
        config.environment = environment;
        config.validate()?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_for(Environment::from_env()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.crud.max_limit <= 0 {
            return Err(ConfigError::Invalid("crud.max_limit must be positive".into()));
        }
        if self.auth.token_ttl_minutes <= 0 {
            return Err(ConfigError::Invalid(
                "auth.token_ttl_minutes must be positive".into(),
            ));
        }
        if self.environment.is_production() {
            if self.chatfuel.key.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "chatfuel.key is required in production".into(),
                ));
            }
            if self.auth.jwt_secret.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "auth.jwt_secret is required in production".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
