use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use validator::Validate;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvVar(#[from] std::env::VarError),

    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

#[derive(Error, Debug)]
#[error("unknown SQL dialect '{0}' (expected sqlite, postgres or mysql)")]
pub struct UnknownDialect(pub String);

/// Backend the SQL and DDL renderers target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialectKind {
    Sqlite,
    Postgres,
    Mysql,
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialectKind::Sqlite => write!(f, "sqlite"),
            DialectKind::Postgres => write!(f, "postgres"),
            DialectKind::Mysql => write!(f, "mysql"),
        }
    }
}

impl FromStr for DialectKind {
    type Err = UnknownDialect;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(DialectKind::Sqlite),
            "postgres" | "postgresql" | "pg" => Ok(DialectKind::Postgres),
            "mysql" | "mariadb" => Ok(DialectKind::Mysql),
            other => Err(UnknownDialect(other.to_string())),
        }
    }
}

/// Engine configuration with validation
#[derive(Clone, Debug, Validate, Serialize, Deserialize)]
pub struct OrmConfig {
    /// SQL dialect used for rendering statements and DDL
    pub dialect: DialectKind,

    /// Connection target handed to the connection provider (a file path for sqlite)
    #[validate(length(min = 1, message = "Database url cannot be empty"))]
    pub database_url: String,

    /// Log every rendered statement at debug level
    pub log_sql: bool,

    /// Maximum number of ids sent in one batch-load IN list
    #[validate(range(
        min = 1,
        max = 10000,
        message = "Batch size must be between 1 and 10000"
    ))]
    pub batch_size: usize,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            dialect: DialectKind::Sqlite,
            database_url: "relgraph.db".to_string(),
            log_sql: false,
            batch_size: 500,
        }
    }
}

impl OrmConfig {
    /// Create configuration from environment variables (and `.env`) with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Self {
            dialect: parse_env_var("RELGRAPH_DIALECT", "sqlite")?,
            database_url: env_value("RELGRAPH_DATABASE_URL", "relgraph.db")?,
            log_sql: parse_env_var("RELGRAPH_LOG_SQL", "false")?,
            batch_size: parse_env_var("RELGRAPH_BATCH_SIZE", "500")?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "yaml_file".to_string(),
            value: "file read failed".to_string(),
            source: Box::new(e),
        })?;

        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            field: "yaml_content".to_string(),
            value: content.to_string(),
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Merge with another configuration (the other side wins)
    pub fn merge(&mut self, other: Self) {
        self.dialect = other.dialect;
        self.database_url = other.database_url;
        self.log_sql = other.log_sql;
        self.batch_size = other.batch_size;
    }
}

/// Value of an environment variable, `default` when unset.
/// A value that is not valid unicode is an error.
fn env_value(key: &str, default: &str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => Ok(value),
        Err(env::VarError::NotPresent) => Ok(default.to_string()),
        Err(e) => Err(e.into()),
    }
}

/// Parse an environment variable with a default value
fn parse_env_var<T: FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env_value(key, default)?;
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}
