//! Process configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context};

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEV_JWT_SECRET: &str = "dev-secret";

/// Which storage backs the permission grids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub jwt_secret: String,
    pub store: StoreBackend,
    /// JSON array of `{project_id, user_id, role}` seeding the in-memory
    /// membership directory.
    pub memberships_file: Option<PathBuf>,
}

impl ApiConfig {
    /// In-memory configuration with the given secret (tests, local runs).
    pub fn in_memory(jwt_secret: impl Into<String>) -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            jwt_secret: jwt_secret.into(),
            store: StoreBackend::InMemory,
            memberships_file: None,
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let bind_addr = lookup("SITEGATE_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("SITEGATE_BIND_ADDR must be a socket address such as 0.0.0.0:8080")?;

        let jwt_secret = match lookup("JWT_SECRET") {
            Some(secret) if !secret.is_empty() => secret,
            _ => {
                tracing::warn!("JWT_SECRET not set; using insecure dev default");
                DEV_JWT_SECRET.to_string()
            }
        };

        let use_persistent = match lookup("USE_PERSISTENT_STORES") {
            Some(raw) => raw
                .trim()
                .parse::<bool>()
                .with_context(|| format!("USE_PERSISTENT_STORES must be true or false, got '{raw}'"))?,
            None => false,
        };

        let store = if use_persistent {
            match lookup("DATABASE_URL") {
                Some(database_url) if !database_url.is_empty() => StoreBackend::Postgres { database_url },
                _ => bail!("DATABASE_URL must be set when USE_PERSISTENT_STORES=true"),
            }
        } else {
            StoreBackend::InMemory
        };

        let memberships_file = lookup("SITEGATE_MEMBERSHIPS_FILE")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        Ok(Self {
            bind_addr,
            jwt_secret,
            store,
            memberships_file,
        })
    }
}
