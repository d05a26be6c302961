//! Connection descriptor resolution
//!
//! A [`DbConfig`] is whatever the caller knows (TOML section, CLI flags).
//! [`DbConfig::resolve`] fills the gaps from the environment and validates
//! the result into a [`ConnectionDescriptor`].

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgConnectOptions;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Partial connection settings, deserialisable from a `[database]` TOML section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DbConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub min_connections: Option<u32>,
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

/// Where the backend lives.
#[derive(Clone, PartialEq, Eq)]
pub enum Endpoint {
    Url(String),
    Parts {
        host: String,
        port: u16,
        database: String,
        user: String,
        password: Option<String>,
    },
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Url(_) => f.write_str("Url(<redacted>)"),
            Endpoint::Parts {
                host,
                port,
                database,
                user,
                password,
            } => f
                .debug_struct("Parts")
                .field("host", host)
                .field("port", port)
                .field("database", database)
                .field("user", user)
                .field("password", &password.as_ref().map(|_| "<redacted>"))
                .finish(),
        }
    }
}

/// Complete, validated connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub endpoint: Endpoint,
    pub min_connections: u32,
    pub max_connections: u32,
    pub connect_timeout: Duration,
}

impl DbConfig {
    /// Field-by-field merge; values set in `top` win.
    pub fn overlay(self, top: DbConfig) -> DbConfig {
        DbConfig {
            url: top.url.or(self.url),
            host: top.host.or(self.host),
            port: top.port.or(self.port),
            database: top.database.or(self.database),
            user: top.user.or(self.user),
            password: top.password.or(self.password),
            min_connections: top.min_connections.or(self.min_connections),
            max_connections: top.max_connections.or(self.max_connections),
            connect_timeout_secs: top.connect_timeout_secs.or(self.connect_timeout_secs),
        }
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> StoreResult<ConnectionDescriptor> {
        self.resolve_with(|key| std::env::var(key).ok())
    }

    /// Resolve with an injected environment lookup.
    ///
    /// Explicit values win over the environment. A URL (explicit or
    /// `DATABASE_URL`) wins over individual parts.
    pub fn resolve_with<F>(&self, env: F) -> StoreResult<ConnectionDescriptor>
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |explicit: &Option<String>, key: &str| {
            explicit
                .clone()
                .or_else(|| env(key))
                .filter(|v| !v.trim().is_empty())
        };

        let endpoint = if let Some(url) = pick(&self.url, "DATABASE_URL") {
            debug!("using connection url");
            Endpoint::Url(url)
        } else {
            let host = pick(&self.host, "PGHOST");
            let database = pick(&self.database, "PGDATABASE");
            let user = pick(&self.user, "PGUSER");
            let port = match self.port {
                Some(port) => port,
                None => match env("PGPORT") {
                    Some(raw) => parse_env("PGPORT", &raw)?,
                    None => DEFAULT_PORT,
                },
            };

            let missing: Vec<&str> = [
                ("host", host.is_none()),
                ("database", database.is_none()),
                ("user", user.is_none()),
            ]
            .iter()
            .filter(|(_, absent)| *absent)
            .map(|(name, _)| *name)
            .collect();

            match (host, database, user) {
                (Some(host), Some(database), Some(user)) => Endpoint::Parts {
                    host,
                    port,
                    database,
                    user,
                    password: pick(&self.password, "PGPASSWORD"),
                },
                _ => {
                    return Err(StoreError::configuration(format!(
                        "no database url and missing {} (set DATABASE_URL or PGHOST/PGDATABASE/PGUSER)",
                        missing.join(", ")
                    )))
                }
            }
        };

        let min_connections = match self.min_connections {
            Some(n) => n,
            None => match env("ADRATER_DB_MIN_CONNECTIONS") {
                Some(raw) => parse_env("ADRATER_DB_MIN_CONNECTIONS", &raw)?,
                None => DEFAULT_MIN_CONNECTIONS,
            },
        };
        let max_connections = match self.max_connections {
            Some(n) => n,
            None => match env("ADRATER_DB_MAX_CONNECTIONS") {
                Some(raw) => parse_env("ADRATER_DB_MAX_CONNECTIONS", &raw)?,
                None => DEFAULT_MAX_CONNECTIONS,
            },
        };

        if max_connections == 0 {
            return Err(StoreError::configuration(
                "max_connections must be at least 1",
            ));
        }
        if min_connections > max_connections {
            return Err(StoreError::configuration(format!(
                "min_connections ({min_connections}) exceeds max_connections ({max_connections})"
            )));
        }

        Ok(ConnectionDescriptor {
            endpoint,
            min_connections,
            max_connections,
            connect_timeout: Duration::from_secs(
                self.connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
        })
    }
}

impl ConnectionDescriptor {
    /// Build a descriptor straight from a URL with default pool sizing.
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::Url(url.into()),
            min_connections: DEFAULT_MIN_CONNECTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn with_pool_size(mut self, min_connections: u32, max_connections: u32) -> Self {
        self.min_connections = min_connections;
        self.max_connections = max_connections;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// sqlx connect options for this endpoint.
    pub fn connect_options(&self) -> StoreResult<PgConnectOptions> {
        match &self.endpoint {
            Endpoint::Url(url) => url.parse::<PgConnectOptions>().map_err(|err| {
                StoreError::configuration(format!("invalid database url: {err}"))
            }),
            Endpoint::Parts {
                host,
                port,
                database,
                user,
                password,
            } => {
                let options = PgConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .database(database)
                    .username(user);
                Ok(match password {
                    Some(password) => options.password(password),
                    None => options,
                })
            }
        }
    }

    /// Short label for logs, never includes credentials.
    pub fn label(&self) -> String {
        match &self.endpoint {
            Endpoint::Url(_) => "database url".to_string(),
            Endpoint::Parts {
                host,
                port,
                database,
                ..
            } => format!("{host}:{port}/{database}"),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: &str) -> StoreResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| StoreError::configuration(format!("{key} has invalid value '{raw}'")))
}
