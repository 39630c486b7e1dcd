//! Database connection management.

use staging_core::TransitionError;
use staging_core::config::non_empty;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;
use thiserror::Error;

/// Database connection wrapper.
pub type Database = Surreal<Any>;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Connection endpoint: "mem://", "rocksdb://path" or a remote url
    pub endpoint: String,
    /// Namespace to use
    pub namespace: String,
    /// Database name to use
    pub database: String,
    /// Optional root credentials for authentication
    pub credentials: Option<(String, String)>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "staging".to_string(),
            database: "main".to_string(),
            credentials: None,
        }
    }
}

impl DbConfig {
    /// Create a config for in-memory testing.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Create a config for RocksDB persistence (requires rocksdb feature).
    pub fn rocksdb(path: impl Into<String>) -> Self {
        Self {
            endpoint: format!("rocksdb://{}", path.into()),
            ..Default::default()
        }
    }

    /// Set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the database name.
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Set root credentials for authentication.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some((username.into(), password.into()));
        self
    }

    /// Build a config from environment variables.
    ///
    /// - `DATABASE_URL` (default: `mem://`)
    /// - `DATABASE_NAMESPACE` (default: `staging`)
    /// - `DATABASE_NAME` (default: `main`)
    /// - `DATABASE_USER` / `DATABASE_PASSWORD` (optional, both required to sign in)
    pub fn from_env() -> Self {
        let get = |key: &str| std::env::var(key).ok().and_then(non_empty);
        let defaults = Self::default();

        Self {
            endpoint: get("DATABASE_URL").unwrap_or(defaults.endpoint),
            namespace: get("DATABASE_NAMESPACE").unwrap_or(defaults.namespace),
            database: get("DATABASE_NAME").unwrap_or(defaults.database),
            credentials: get("DATABASE_USER").zip(get("DATABASE_PASSWORD")),
        }
    }
}

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(#[from] surrealdb::Error),
    #[error("Query error: {0}")]
    Query(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflicting update: {0}")]
    InvalidTransition(#[from] TransitionError),
}

impl DbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DbError::NotFound(_))
    }
}

/// Open a connection, select the namespace and database, and apply the schema.
pub async fn connect(config: &DbConfig) -> Result<Database, DbError> {
    tracing::info!("Connecting to database: {}", config.endpoint);

    let db = surrealdb::engine::any::connect(&config.endpoint).await?;

    // Authenticate if credentials provided
    if let Some((username, password)) = &config.credentials {
        db.signin(Root { username, password }).await?;
    }

    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await?;

    crate::schema::init_schema(&db).await?;

    tracing::info!(
        "Connected to database: {}/{}",
        config.namespace,
        config.database
    );

    Ok(db)
}
