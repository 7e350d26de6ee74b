use std::borrow::Cow;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Resolved process configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DbConfig<'static>,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origin; any origin when unset.
    pub client_origin: Option<String>,
}

impl ServerConfig {
    pub fn bind_address(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| ConfigError::Invalid {
                key: "SERVER_HOST",
                value: self.host.clone(),
            })
    }
}

/// Database configuration with `Cow` fields so tests can use borrowed literals.
#[derive(Debug, Clone)]
pub struct DbConfig<'a> {
    pub host: Cow<'a, str>,
    pub port: u16,
    pub database: Cow<'a, str>,
    pub user: Cow<'a, str>,
    pub password: Cow<'a, str>,
    /// Full connection URL; overrides the individual parts when present.
    pub url: Option<Cow<'a, str>>,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub ready_retries: u32,
    pub ready_backoff: Duration,
    pub apply_schema: bool,
}

impl<'a> DbConfig<'a> {
    pub fn new(
        host: impl Into<Cow<'a, str>>,
        port: u16,
        database: impl Into<Cow<'a, str>>,
        user: impl Into<Cow<'a, str>>,
        password: impl Into<Cow<'a, str>>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            database: database.into(),
            user: user.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn with_url(mut self, url: impl Into<Cow<'a, str>>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn connection_string(&self) -> Cow<'_, str> {
        match &self.url {
            Some(url) => Cow::Borrowed(url.as_ref()),
            None => Cow::Owned(format!(
                "postgres://{}:{}@{}:{}/{}",
                self.user, self.password, self.host, self.port, self.database
            )),
        }
    }
}

impl Default for DbConfig<'_> {
    fn default() -> Self {
        Self {
            host: Cow::Borrowed("localhost"),
            port: 5432,
            database: Cow::Borrowed("clinical_records"),
            user: Cow::Borrowed("postgres"),
            password: Cow::Borrowed("postgres"),
            url: None,
            max_connections: 20,
            acquire_timeout: Duration::from_secs(10),
            ready_retries: 3,
            ready_backoff: Duration::from_millis(250),
            apply_schema: true,
        }
    }
}

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub token_ttl: Duration,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("token_ttl", &self.token_ttl)
            .finish()
    }
}

pub const DEFAULT_ISSUER: &str = "clinical-records-api";
pub const DEFAULT_AUDIENCE: &str = "clinician-portal";

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let server = ServerConfig {
            host: get("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&get, "APPLICATION_PORT", 8080)?,
            client_origin: get("CLIENT_ORIGIN"),
        };

        let defaults = DbConfig::default();
        let mut database = DbConfig::new(
            get("DB_HOST").unwrap_or_else(|| defaults.host.to_string()),
            parse_or(&get, "DB_PORT", defaults.port)?,
            get("DB_NAME").unwrap_or_else(|| defaults.database.to_string()),
            get("DB_USER").unwrap_or_else(|| defaults.user.to_string()),
            get("DB_PASSWORD").unwrap_or_else(|| defaults.password.to_string()),
        )
        .with_max_connections(parse_or(&get, "DB_MAX_CONNECTIONS", defaults.max_connections)?);
        if let Some(url) = get("DATABASE_URL") {
            database = database.with_url(url);
        }
        database.acquire_timeout = Duration::from_secs(parse_or(&get, "DB_ACQUIRE_TIMEOUT_SECS", 10)?);
        database.ready_retries = parse_or(&get, "DB_READY_RETRIES", defaults.ready_retries)?;
        database.ready_backoff = Duration::from_millis(parse_or(&get, "DB_READY_BACKOFF_MS", 250)?);
        database.apply_schema = parse_or(&get, "DB_APPLY_SCHEMA", true)?;

        let auth = AuthConfig {
            secret: get("JWT_SECRET_KEY").ok_or(ConfigError::Missing("JWT_SECRET_KEY"))?,
            issuer: get("TOKEN_ISSUER").unwrap_or_else(|| DEFAULT_ISSUER.to_string()),
            audience: get("TOKEN_AUDIENCE").unwrap_or_else(|| DEFAULT_AUDIENCE.to_string()),
            token_ttl: Duration::from_secs(3600 * parse_or(&get, "TOKEN_TTL_HOURS", 12u64)?),
        };

        Ok(Self {
            server,
            database,
            auth,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}
