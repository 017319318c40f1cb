// ABOUTME: Environment-sourced configuration for a replication run
// ABOUTME: Raw clap arguments are validated into an explicit ReplicatorConfig before any connection

use clap::Args;
use std::fmt;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::utils::validate_table_name;

pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_SQL_PORT: u16 = 1433;
pub const DEFAULT_STATE_FILE: &str = "replication_state.json";
pub const DEFAULT_BQ_API_URL: &str = "https://bigquery.googleapis.com";

/// Raw options as read from flags and environment variables.
///
/// Required values are optional here so that validation can report them with
/// a clear message instead of clap's generic usage error.
#[derive(Args, Clone, Default)]
pub struct ReplicatorArgs {
    /// SQL Server host, optionally as host,port
    #[arg(long = "sql-server", env = "SQL_SERVER")]
    pub sql_server: Option<String>,
    /// SQL Server port (ignored when SQL_SERVER carries one)
    #[arg(long = "sql-port", env = "SQL_PORT", default_value_t = DEFAULT_SQL_PORT)]
    pub sql_port: u16,
    /// Source database name
    #[arg(long = "sql-database", env = "SQL_DATABASE")]
    pub sql_database: Option<String>,
    /// SQL Server login
    #[arg(long = "sql-username", env = "SQL_USERNAME")]
    pub sql_username: Option<String>,
    /// SQL Server password
    #[arg(long = "sql-password", env = "SQL_PASSWORD", hide_env_values = true)]
    pub sql_password: Option<String>,
    /// Accept the server certificate without validation (self-signed servers)
    #[arg(long = "sql-trust-cert", env = "SQL_TRUST_CERT")]
    pub sql_trust_cert: bool,
    /// Target Google Cloud project
    #[arg(long = "bq-project-id", env = "BQ_PROJECT_ID")]
    pub bq_project_id: Option<String>,
    /// Target BigQuery dataset
    #[arg(long = "bq-dataset", env = "BQ_DATASET")]
    pub bq_dataset: Option<String>,
    /// Location used when creating the dataset and running jobs
    #[arg(long = "bq-location", env = "BQ_LOCATION", default_value = "US")]
    pub bq_location: String,
    /// Service account key used to mint access tokens
    #[arg(long = "credentials", env = "GOOGLE_APPLICATION_CREDENTIALS")]
    pub credentials: Option<PathBuf>,
    /// Pre-issued OAuth access token (skips gcloud)
    #[arg(long = "access-token", env = "BQ_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,
    /// BigQuery REST endpoint
    #[arg(long = "bq-api-url", env = "BQ_API_URL", default_value = DEFAULT_BQ_API_URL)]
    pub bq_api_url: String,
    /// Tables to replicate (comma-separated)
    #[arg(long = "tables", env = "TABLES_TO_REPLICATE", value_delimiter = ',')]
    pub tables: Vec<String>,
    /// Rows per page during the initial load
    #[arg(long = "batch-size", env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    /// Checkpoint document path
    #[arg(long = "state-file", env = "REPLICATION_STATE_FILE", default_value = DEFAULT_STATE_FILE)]
    pub state_file: PathBuf,
}

/// SQL Server connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub trust_cert: bool,
}

impl SourceConfig {
    /// `host:port/database`, safe to log.
    pub fn endpoint(&self) -> String {
        format!("{}:{}/{}", self.host, self.port, self.database)
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("trust_cert", &self.trust_cert)
            .finish()
    }
}

/// BigQuery connection parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub project_id: String,
    pub dataset: String,
    pub location: String,
    pub credentials: Option<PathBuf>,
    pub access_token: Option<String>,
    pub api_base_url: String,
}

impl TargetConfig {
    /// `project.dataset`, safe to log.
    pub fn endpoint(&self) -> String {
        format!("{}.{}", self.project_id, self.dataset)
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("project_id", &self.project_id)
            .field("dataset", &self.dataset)
            .field("location", &self.location)
            .field("credentials", &self.credentials)
            .field("access_token", &self.access_token.as_ref().map(|_| "***"))
            .field("api_base_url", &self.api_base_url)
            .finish()
    }
}

/// Validated configuration, constructed once at startup and passed down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicatorConfig {
    pub source: SourceConfig,
    pub target: TargetConfig,
    pub tables: Vec<String>,
    pub batch_size: usize,
    pub state_path: PathBuf,
}

impl ReplicatorConfig {
    pub fn from_args(args: ReplicatorArgs) -> Result<Self, ConfigError> {
        let server = required(args.sql_server, ConfigError::MissingSource("SQL_SERVER"))?;
        let (host, port) = parse_server_address(&server, args.sql_port)?;
        let database = required(args.sql_database, ConfigError::MissingSource("SQL_DATABASE"))?;
        let username = required(args.sql_username, ConfigError::MissingSource("SQL_USERNAME"))?;
        let password = required(args.sql_password, ConfigError::MissingSource("SQL_PASSWORD"))?;

        let project_id = required(args.bq_project_id, ConfigError::MissingTarget("BQ_PROJECT_ID"))?;
        let dataset = required(args.bq_dataset, ConfigError::MissingTarget("BQ_DATASET"))?;

        let tables = validate_tables(args.tables)?;

        if args.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }

        Ok(Self {
            source: SourceConfig {
                host,
                port,
                database,
                username,
                password,
                trust_cert: args.sql_trust_cert,
            },
            target: TargetConfig {
                project_id,
                dataset,
                location: args.bq_location,
                credentials: args.credentials,
                access_token: args.access_token.filter(|t| !t.trim().is_empty()),
                api_base_url: args.bq_api_url.trim_end_matches('/').to_string(),
            },
            tables,
            batch_size: args.batch_size,
            state_path: args.state_file,
        })
    }
}

fn required(value: Option<String>, missing: ConfigError) -> Result<String, ConfigError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(missing),
    }
}

/// Split `host,port` (the ODBC convention the source ecosystem uses).
fn parse_server_address(server: &str, default_port: u16) -> Result<(String, u16), ConfigError> {
    match server.split_once(',') {
        None => Ok((server.to_string(), default_port)),
        Some((host, port)) => {
            let host = host.trim();
            let port = port
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidSourceAddress(server.to_string()))?;
            if host.is_empty() {
                return Err(ConfigError::InvalidSourceAddress(server.to_string()));
            }
            Ok((host.to_string(), port))
        }
    }
}

/// Trim, drop blanks, and reject invalid or duplicated names.
fn validate_tables(raw: Vec<String>) -> Result<Vec<String>, ConfigError> {
    let mut tables: Vec<String> = Vec::new();
    for name in raw.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        validate_table_name(name).map_err(|e| ConfigError::InvalidTableName {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        if tables.iter().any(|t| t == name) {
            return Err(ConfigError::DuplicateTable(name.to_string()));
        }
        tables.push(name.to_string());
    }
    if tables.is_empty() {
        return Err(ConfigError::NoTables);
    }
    Ok(tables)
}
