//! Configuration loading and profile selection.
//!
//! A single TOML file carries shared `[sync]` tunables and one section per
//! deployment profile. The active profile is picked by the `ENV` environment
//! variable (or `--profile`), and the resolved [`Config`] is built once at
//! startup and handed to every stage.
//!
//! ```toml
//! [sync]
//! file_batch_size = 100
//! feedback_batch_size = 1
//!
//! [profiles.dev]
//! local_files_dir = "./local_files"
//! feedback_prefix = "dev/feedback/"
//!
//! [profiles.dev.database]
//! backend = "postgres"
//! host = "localhost"
//! name = "iris"
//! user = "iris"
//! password = "secret"
//!
//! [profiles.dev.bucket]
//! name = "iris-feedback-dev"
//! region = "us-east-1"
//! role_arn = "arn:aws:iam::123456789012:role/iris-sync"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable selecting the active profile.
pub const PROFILE_ENV_VAR: &str = "ENV";

const MAX_BATCH_SIZE: usize = 10_000;
const MAX_PAGE_SIZE: u32 = 1000;

/// Deployment profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    Dev,
    Prod,
}

impl Profile {
    /// Resolve the profile from `ENV`. An unset variable means `dev`.
    pub fn from_env() -> Result<Self> {
        match std::env::var(PROFILE_ENV_VAR) {
            Ok(value) => value.parse(),
            Err(std::env::VarError::NotPresent) => Ok(Profile::Dev),
            Err(e) => Err(e).with_context(|| format!("Invalid {} value", PROFILE_ENV_VAR)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Dev => "dev",
            Profile::Prod => "prod",
        }
    }

    fn default_local_files_dir(&self) -> PathBuf {
        match self {
            Profile::Dev => PathBuf::from("./local_files"),
            Profile::Prod => PathBuf::from("/path/to/prod/local_files"),
        }
    }

    fn default_feedback_prefix(&self) -> String {
        match self {
            Profile::Dev => "dev/feedback/".to_string(),
            Profile::Prod => "prod/feedback/".to_string(),
        }
    }
}

impl FromStr for Profile {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "dev" => Ok(Profile::Dev),
            "prod" => Ok(Profile::Prod),
            other => bail!("Unknown profile: '{}'. Must be dev or prod.", other),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct Config {
    pub profile: Profile,
    pub sync: SyncConfig,
    pub local_files_dir: PathBuf,
    pub feedback_prefix: String,
    pub database: DatabaseConfig,
    pub bucket: BucketConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_file_batch_size")]
    pub file_batch_size: usize,
    #[serde(default = "default_feedback_batch_size")]
    pub feedback_batch_size: usize,
    /// Record ingested feedback keys and skip them on later runs.
    #[serde(default)]
    pub feedback_checkpoint: bool,
    /// Exit non-zero when any stage records a failure.
    #[serde(default)]
    pub strict: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            file_batch_size: default_file_batch_size(),
            feedback_batch_size: default_feedback_batch_size(),
            feedback_checkpoint: false,
            strict: false,
        }
    }
}

fn default_file_batch_size() -> usize {
    100
}
fn default_feedback_batch_size() -> usize {
    1
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Postgres(PostgresConfig),
    Sqlite(SqliteConfig),
}

#[derive(Deserialize, Clone)]
pub struct PostgresConfig {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub name: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
}

fn default_pg_port() -> u16 {
    5432
}

// Keeps the password out of logs and panics.
impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BucketConfig {
    pub name: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub role_arn: Option<String>,
    /// Custom S3-compatible endpoint (MinIO, LocalStack). Uses path-style addressing.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_page_size() -> u32 {
    1000
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    sync: SyncConfig,
    #[serde(default)]
    profiles: ProfilesSection,
}

#[derive(Debug, Deserialize, Default)]
struct ProfilesSection {
    dev: Option<ProfileSection>,
    prod: Option<ProfileSection>,
}

#[derive(Debug, Deserialize)]
struct ProfileSection {
    local_files_dir: Option<PathBuf>,
    feedback_prefix: Option<String>,
    database: DatabaseConfig,
    bucket: BucketConfig,
}

pub fn load_config(path: &Path, profile: Profile) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content, profile)
        .with_context(|| format!("Invalid config file: {}", path.display()))
}

pub fn parse_config(content: &str, profile: Profile) -> Result<Config> {
    let file: ConfigFile = toml::from_str(content).context("Failed to parse config file")?;

    let section = match profile {
        Profile::Dev => file.profiles.dev,
        Profile::Prod => file.profiles.prod,
    };
    let Some(section) = section else {
        bail!("Profile '{}' is not configured ([profiles.{}] missing)", profile, profile);
    };

    let config = Config {
        profile,
        sync: file.sync,
        local_files_dir: section
            .local_files_dir
            .unwrap_or_else(|| profile.default_local_files_dir()),
        feedback_prefix: section
            .feedback_prefix
            .unwrap_or_else(|| profile.default_feedback_prefix()),
        database: section.database,
        bucket: section.bucket,
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if !(1..=MAX_BATCH_SIZE).contains(&config.sync.file_batch_size) {
        bail!("sync.file_batch_size must be in [1, {}]", MAX_BATCH_SIZE);
    }
    if !(1..=MAX_BATCH_SIZE).contains(&config.sync.feedback_batch_size) {
        bail!("sync.feedback_batch_size must be in [1, {}]", MAX_BATCH_SIZE);
    }

    let profile = config.profile;
    if config.bucket.name.trim().is_empty() {
        bail!("profiles.{}.bucket.name must not be empty", profile);
    }
    if !(1..=MAX_PAGE_SIZE).contains(&config.bucket.page_size) {
        bail!("profiles.{}.bucket.page_size must be in [1, {}]", profile, MAX_PAGE_SIZE);
    }

    match &config.database {
        DatabaseConfig::Postgres(pg) => {
            for (field, value) in [("host", &pg.host), ("name", &pg.name), ("user", &pg.user)] {
                if value.trim().is_empty() {
                    bail!("profiles.{}.database.{} must not be empty", profile, field);
                }
            }
        }
        DatabaseConfig::Sqlite(sqlite) => {
            if sqlite.path.as_os_str().is_empty() {
                bail!("profiles.{}.database.path must not be empty", profile);
            }
        }
    }

    Ok(())
}
