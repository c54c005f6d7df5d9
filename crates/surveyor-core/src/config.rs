//! Configuration for connecting to the backing graph store.
//!
//! Settings are loaded from (in priority order):
//! 1. Environment variables (`SURVEYOR_` prefix, e.g. `SURVEYOR_GRAPH__URI`)
//! 2. Config file (`surveyor.toml`)
//! 3. Defaults

use serde::Deserialize;

use crate::error::CoreError;

/// Connection settings for the Neo4j graph store.
///
/// The engine never owns the connection lifecycle; callers load settings,
/// build a client from them, and pass the client in.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphSettings {
    pub uri: String,
    pub user: String,
    pub password: String,
    /// Database name; `None` uses the server default.
    #[serde(default)]
    pub database: Option<String>,
    pub max_connections: u32,
    pub fetch_size: usize,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "surveyor-dev".to_string(),
            database: None,
            max_connections: 16,
            fetch_size: 256,
        }
    }
}

impl GraphSettings {
    /// Load settings from `surveyor.toml` and `SURVEYOR_`-prefixed environment
    /// variables, falling back to local-development defaults.
    pub fn load() -> Result<Self, CoreError> {
        let defaults = Self::default();
        let cfg = config::Config::builder()
            .set_default("uri", defaults.uri)?
            .set_default("user", defaults.user)?
            .set_default("password", defaults.password)?
            .set_default("max_connections", defaults.max_connections as i64)?
            .set_default("fetch_size", defaults.fetch_size as i64)?
            .add_source(config::File::with_name("surveyor").required(false))
            .add_source(config::Environment::with_prefix("SURVEYOR").separator("__"))
            .build()?;
        Ok(cfg.try_deserialize()?)
    }
}
