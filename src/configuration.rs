use chrono::Duration;
use jsonwebtoken::Algorithm;

use crate::error::ConfigError;

#[derive(serde::Deserialize, Clone, Debug)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub application: ApplicationSettings,
    pub jwt: JwtSettings,
    pub cookie: CookieSettings,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(serde::Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Postgres,
    Memory,
}

#[derive(serde::Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub backend: DatabaseBackend,
    pub username: String,
    pub password: String,
    pub port: u16,
    pub host: String,
    pub database_name: String,
    pub max_connections: u32,
}

impl DatabaseSettings {
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database_name
        )
    }

    /// Server-level URL, used to create throwaway databases in tests
    pub fn connection_string_without_db(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}",
            self.username, self.password, self.host, self.port
        )
    }
}

const MAX_ACCESS_TOKEN_MINUTES: i64 = 365 * 24 * 60;
const MAX_REFRESH_TOKEN_DAYS: i64 = 3650;

fn bounded_ttl(key: &str, value: i64, max: i64) -> Result<i64, ConfigError> {
    if value <= 0 || value > max {
        return Err(ConfigError::InvalidValue(format!(
            "{} must be between 1 and {}, got {}",
            key, max, value
        )));
    }
    Ok(value)
}

/// JWT authentication settings
#[derive(serde::Deserialize, Clone, Debug)]
pub struct JwtSettings {
    pub secret: String,
    pub algorithm: String,
    pub access_token_expire_minutes: i64,
    pub refresh_token_expire_days: i64,
    /// Issue a fresh refresh token (and revoke the presented one) on every refresh
    pub rotate_refresh_tokens: bool,
}

impl JwtSettings {
    /// Signing algorithm; only the HMAC family works with a shared secret
    pub fn algorithm(&self) -> Result<Algorithm, ConfigError> {
        match self.algorithm.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(Algorithm::HS256),
            "HS384" => Ok(Algorithm::HS384),
            "HS512" => Ok(Algorithm::HS512),
            other => Err(ConfigError::InvalidValue(format!(
                "jwt.algorithm '{}' is not supported (expected HS256, HS384 or HS512)",
                other
            ))),
        }
    }

    /// # Errors
    /// Non-positive values and values above one year are rejected
    pub fn access_token_ttl(&self) -> Result<Duration, ConfigError> {
        bounded_ttl(
            "jwt.access_token_expire_minutes",
            self.access_token_expire_minutes,
            MAX_ACCESS_TOKEN_MINUTES,
        )
        .map(Duration::minutes)
    }

    /// # Errors
    /// Non-positive values and values above ten years are rejected
    pub fn refresh_token_ttl(&self) -> Result<Duration, ConfigError> {
        bounded_ttl(
            "jwt.refresh_token_expire_days",
            self.refresh_token_expire_days,
            MAX_REFRESH_TOKEN_DAYS,
        )
        .map(Duration::days)
    }
}

/// Attributes of the credential cookies
#[derive(serde::Deserialize, Clone, Debug)]
pub struct CookieSettings {
    pub secure: bool,
    pub domain: Option<String>,
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let settings = config::Config::builder()
        .set_default("application.host", "127.0.0.1")?
        .set_default("application.port", 8000)?
        .set_default("database.backend", "postgres")?
        .set_default("database.username", "postgres")?
        .set_default("database.password", "password")?
        .set_default("database.host", "localhost")?
        .set_default("database.port", 5432)?
        .set_default("database.database_name", "todo_app")?
        .set_default("database.max_connections", 5)?
        .set_default("jwt.algorithm", "HS256")?
        .set_default("jwt.access_token_expire_minutes", 1440)?
        .set_default("jwt.refresh_token_expire_days", 7)?
        .set_default("jwt.rotate_refresh_tokens", false)?
        .set_default("cookie.secure", false)?
        .add_source(config::File::with_name("configuration").required(false))
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    settings.try_deserialize::<Settings>()
}
