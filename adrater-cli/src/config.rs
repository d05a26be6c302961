use std::path::{Path, PathBuf};

use adrater_store::DbConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Migrations directory used when neither flag nor config names one
pub const DEFAULT_MIGRATIONS_DIR: &str = "migrations";

/// Load environment variables from .env files
///
/// Priority order (highest to lowest):
/// 1. Environment variables already set
/// 2. Current directory .env
/// 3. ~/.adrater/.env
///
/// Runs before tracing is initialised, so it reports the files it loaded
/// instead of logging them.
pub fn load_dotenv() -> Result<Vec<String>> {
    let mut loaded_from = Vec::new();

    if let Ok(path) = dotenvy::dotenv() {
        loaded_from.push(path.display().to_string());
    }

    if let Some(env_file) = config_dir().map(|dir| dir.join(".env")) {
        if env_file.exists() {
            // dotenvy doesn't overwrite existing vars
            dotenvy::from_path(&env_file)
                .with_context(|| format!("Failed to load {}", env_file.display()))?;
            loaded_from.push(env_file.display().to_string());
        }
    }

    Ok(loaded_from)
}

/// Get the adrater config directory path (~/.adrater)
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".adrater"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdraterConfig {
    #[serde(default)]
    pub database: DbConfig,

    #[serde(default)]
    pub migrations: MigrationsConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationsConfig {
    /// Directory holding `<n>.<name>.sql` scripts
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Metadata table name (defaults to `migrations`)
    #[serde(default)]
    pub table: Option<String>,
}

impl AdraterConfig {
    /// Load config from TOML files
    ///
    /// With `explicit`, only that file is read and any failure is an error.
    /// Otherwise, priority order (highest to lowest):
    /// 1. ./adrater.toml (project-specific)
    /// 2. ~/.adrater/config.toml (user defaults)
    /// 3. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            return Self::parse(&contents)
                .with_context(|| format!("Failed to parse config {}", path.display()));
        }

        let mut config = AdraterConfig::default();
        if let Some(global) = config_dir().map(|dir| dir.join("config.toml")) {
            if let Some(loaded) = Self::load_optional(&global) {
                config = loaded;
            }
        }
        if let Some(local) = Self::load_optional(Path::new("adrater.toml")) {
            config = config.merge(local);
        }
        Ok(config)
    }

    fn load_optional(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    debug!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    warn!("Failed to parse {}: {:#}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                debug!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Merge two configs (right overrides left, field by field)
    pub fn merge(self, overlay: Self) -> Self {
        Self {
            database: self.database.overlay(overlay.database),
            migrations: MigrationsConfig {
                dir: overlay.migrations.dir.or(self.migrations.dir),
                table: overlay.migrations.table.or(self.migrations.table),
            },
        }
    }

    pub fn migrations_dir(&self) -> PathBuf {
        self.migrations
            .dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_MIGRATIONS_DIR))
    }
}
