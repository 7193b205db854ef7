//! Store connection settings
//!
//! Resolution order in [`StoreConfig::from_env`]:
//! 1. any of `SURREALDB_ENDPOINT`/`USERNAME`/`PASSWORD` → authenticated
//!    remote connection; all three are then required
//! 2. `SURREALDB_URL` → unauthenticated connection to that URL
//! 3. nothing set → in-memory database

use std::fmt;

use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{info, instrument};

use crate::error::StoreError;
use crate::migrations;
use crate::store::StoreResult;

pub const DEFAULT_NAMESPACE: &str = "stands";
pub const DEFAULT_DATABASE: &str = "main";

/// Credentials for an authenticated SurrealDB endpoint
#[derive(Clone)]
pub struct CloudConfig {
    /// WebSocket endpoint URL (e.g., "wss://db.internal:8000")
    pub endpoint: String,
    pub username: String,
    pub password: String,
    pub namespace: String,
    pub database: String,
    /// Root user (true) or database user (false)
    pub is_root: bool,
}

impl fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("namespace", &self.namespace)
            .field("database", &self.database)
            .field("is_root", &self.is_root)
            .finish()
    }
}

impl CloudConfig {
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            is_root: false,
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_root(mut self, is_root: bool) -> Self {
        self.is_root = is_root;
        self
    }

    /// Reads:
    /// - SURREALDB_ENDPOINT (required)
    /// - SURREALDB_USERNAME (required)
    /// - SURREALDB_PASSWORD (required)
    /// - SURREALDB_NAMESPACE (optional, default: "stands")
    /// - SURREALDB_DATABASE (optional, default: "main")
    /// - SURREALDB_ROOT (optional, "true" for root users)
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(env_var)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StoreResult<Self> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| StoreError::Config(format!("{key} not set")))
        };
        let or_default = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.into());

        Ok(Self {
            endpoint: required("SURREALDB_ENDPOINT")?,
            username: required("SURREALDB_USERNAME")?,
            password: required("SURREALDB_PASSWORD")?,
            namespace: or_default("SURREALDB_NAMESPACE", DEFAULT_NAMESPACE),
            database: or_default("SURREALDB_DATABASE", DEFAULT_DATABASE),
            is_root: lookup("SURREALDB_ROOT").is_some_and(|v| v.eq_ignore_ascii_case("true")),
        })
    }
}

const CLOUD_KEYS: [&str; 3] = [
    "SURREALDB_ENDPOINT",
    "SURREALDB_USERNAME",
    "SURREALDB_PASSWORD",
];

/// Set and non-blank environment variable.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Where the stand store lives.
#[derive(Debug, Clone, Default)]
pub enum StoreConfig {
    /// Process-local `mem://` database, lost on exit
    #[default]
    Memory,
    /// Any URL `surrealdb::engine::any` understands (`surrealkv://path`, `ws://host`)
    Url(String),
    /// Authenticated endpoint
    Cloud(CloudConfig),
}

impl StoreConfig {
    /// Fails with `Config` when remote credentials are only partly set.
    pub fn from_env() -> StoreResult<Self> {
        Self::from_lookup(env_var)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StoreResult<Self> {
        if CLOUD_KEYS.iter().any(|&key| lookup(key).is_some()) {
            return CloudConfig::from_lookup(lookup).map(StoreConfig::Cloud);
        }
        Ok(match lookup("SURREALDB_URL") {
            Some(url) => StoreConfig::Url(url),
            None => StoreConfig::Memory,
        })
    }

    /// Whether stands stored through this config are lost on exit.
    pub fn is_ephemeral(&self) -> bool {
        match self {
            StoreConfig::Memory => true,
            StoreConfig::Url(url) => url.starts_with("mem:"),
            StoreConfig::Cloud(_) => false,
        }
    }

    /// Short description safe to log.
    pub fn describe(&self) -> String {
        match self {
            StoreConfig::Memory => "mem://".to_string(),
            StoreConfig::Url(url) => url.clone(),
            StoreConfig::Cloud(cloud) => {
                format!("{} ({}/{})", cloud.endpoint, cloud.namespace, cloud.database)
            }
        }
    }

    /// Open a connection, authenticate, select namespace/database and
    /// initialize the schema.
    #[instrument(skip_all, fields(target = %self.describe()))]
    pub async fn connect(&self) -> StoreResult<Surreal<Any>> {
        let db = match self {
            StoreConfig::Memory => open("mem://", DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?,
            StoreConfig::Url(url) => open(url, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?,
            StoreConfig::Cloud(config) => open_cloud(config).await?,
        };
        migrations::init_schema(&db).await?;
        info!("stand store connected");
        Ok(db)
    }
}

async fn dial(url: &str) -> StoreResult<Surreal<Any>> {
    surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StoreError::Connection(format!("Failed to connect to {url}: {e}")))
}

async fn select(db: Surreal<Any>, namespace: &str, database: &str) -> StoreResult<Surreal<Any>> {
    db.use_ns(namespace)
        .use_db(database)
        .await
        .map_err(|e| StoreError::Connection(format!("Cannot select {namespace}/{database}: {e}")))?;
    Ok(db)
}

async fn open(url: &str, namespace: &str, database: &str) -> StoreResult<Surreal<Any>> {
    select(dial(url).await?, namespace, database).await
}

async fn open_cloud(config: &CloudConfig) -> StoreResult<Surreal<Any>> {
    let db = dial(&config.endpoint).await?;
    let signed_in = if config.is_root {
        db.signin(Root {
            username: &config.username,
            password: &config.password,
        })
        .await
    } else {
        db.signin(Database {
            namespace: &config.namespace,
            database: &config.database,
            username: &config.username,
            password: &config.password,
        })
        .await
    };
    signed_in.map_err(|e| {
        StoreError::Connection(format!("Sign-in as {} failed: {e}", config.username))
    })?;
    select(db, &config.namespace, &config.database).await
}
