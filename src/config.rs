//! Configuration loading and types for blobkit.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! client: the account and its endpoints, per-request defaults, the retry
//! policy and logging.  Every field has a default, so an empty file is a
//! valid (anonymous, development) configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::client::CloudBlobClient;
use crate::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_MAX_DOWNLOAD_BUFFER, DEFAULT_PARALLELISM};
use crate::credentials::StorageCredentials;
use crate::errors::{Result, StorageError};
use crate::request_options::BlobRequestOptions;
use crate::retry::{
    ExponentialRetry, LinearRetry, NoRetry, RetryPolicy, DEFAULT_DELTA, DEFAULT_MAX_ATTEMPTS,
};
use crate::storage_uri::{LocationMode, StorageUri};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Storage account and endpoints.
    #[serde(default)]
    pub account: AccountConfig,

    /// Defaults applied to every request.
    #[serde(default)]
    pub requests: RequestsConfig,

    /// Retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Account identity and endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Storage account name.
    #[serde(default = "default_account_name")]
    pub name: String,

    /// Base64 account key for Shared Key auth.
    #[serde(default)]
    pub key: Option<String>,

    /// SAS token, with or without the leading `?`.
    #[serde(default)]
    pub sas_token: Option<String>,

    /// Explicit primary blob endpoint (emulators, custom domains).
    #[serde(default)]
    pub blob_endpoint: Option<String>,

    /// Explicit secondary blob endpoint.
    #[serde(default)]
    pub secondary_blob_endpoint: Option<String>,

    /// Use `https` for derived endpoints.
    #[serde(default = "default_true")]
    pub use_https: bool,

    /// Let reads fall back to the secondary endpoint between retries.
    #[serde(default)]
    pub read_from_secondary: bool,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            name: default_account_name(),
            key: None,
            sas_token: None,
            blob_endpoint: None,
            secondary_blob_endpoint: None,
            use_https: true,
            read_from_secondary: false,
        }
    }
}

/// Per-request defaults, mirrored into [`BlobRequestOptions`].
#[derive(Debug, Clone, Deserialize)]
pub struct RequestsConfig {
    /// Server-side timeout per request.
    #[serde(default)]
    pub server_timeout_secs: Option<u64>,

    /// Client-side budget per operation, retries included.
    #[serde(default)]
    pub maximum_execution_time_secs: Option<u64>,

    /// Bytes buffered between a download and its reader.
    #[serde(default = "default_download_buffer")]
    pub maximum_download_buffer_size: usize,

    /// Concurrent chunk uploads per output stream.
    #[serde(default = "default_parallelism")]
    pub parallelism_factor: usize,

    /// Chunk size for output streams.
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    #[serde(default)]
    pub use_transactional_md5: bool,

    #[serde(default = "default_true")]
    pub store_blob_content_md5: bool,

    #[serde(default)]
    pub disable_content_md5_validation: bool,

    #[serde(default)]
    pub absorb_conditional_errors_on_retry: bool,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            server_timeout_secs: None,
            maximum_execution_time_secs: None,
            maximum_download_buffer_size: default_download_buffer(),
            parallelism_factor: default_parallelism(),
            block_size: default_block_size(),
            use_transactional_md5: false,
            store_blob_content_md5: true,
            disable_content_md5_validation: false,
            absorb_conditional_errors_on_retry: false,
        }
    }
}

/// Retry policy kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RetryPolicyKind {
    #[default]
    Exponential,
    Linear,
    None,
}

/// Retry policy settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// `exponential`, `linear` or `none`.
    #[serde(default)]
    pub policy: RetryPolicyKind,

    /// Total attempts, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff step (linear wait, or exponential base) in seconds.
    #[serde(default = "default_delta_secs")]
    pub delta_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            policy: RetryPolicyKind::default(),
            max_attempts: default_max_attempts(),
            delta_secs: default_delta_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_account_name() -> String {
    "devstoreaccount1".to_string()
}

fn default_download_buffer() -> usize {
    DEFAULT_MAX_DOWNLOAD_BUFFER
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_delta_secs() -> f64 {
    DEFAULT_DELTA.as_secs_f64()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

// -- Conversions -------------------------------------------------------------

impl Config {
    /// Primary (and secondary, when known) blob endpoint.  Derived
    /// endpoints follow `<scheme>://<account>.blob.core.windows.net`.
    pub fn endpoint(&self) -> Result<StorageUri> {
        let account = &self.account;
        let scheme = if account.use_https { "https" } else { "http" };
        let (primary, derived_secondary) = match &account.blob_endpoint {
            Some(endpoint) => (endpoint.clone(), None),
            None => (
                format!("{scheme}://{}.blob.core.windows.net", account.name),
                Some(format!("{scheme}://{}-secondary.blob.core.windows.net", account.name)),
            ),
        };
        let parse = |s: &str| {
            reqwest::Url::parse(s).map_err(|e| {
                StorageError::invalid_argument(format!("invalid blob endpoint {s:?}: {e}"))
            })
        };
        let primary = parse(&primary)?;
        match account.secondary_blob_endpoint.clone().or(derived_secondary) {
            Some(secondary) => Ok(StorageUri::with_secondary(primary, parse(&secondary)?)),
            None => Ok(StorageUri::new(primary)),
        }
    }

    /// Credentials from the file, then the environment; anonymous if
    /// neither provides any.  A key wins over a SAS token.
    pub fn credentials(&self) -> Result<StorageCredentials> {
        if let Some(key) = &self.account.key {
            return StorageCredentials::shared_key(self.account.name.clone(), key);
        }
        if let Some(token) = &self.account.sas_token {
            return Ok(StorageCredentials::sas(token.clone()));
        }
        match StorageCredentials::from_env(&self.account.name) {
            Ok(creds) => Ok(creds),
            Err(StorageError::InvalidArgument { .. }) => {
                debug!(account = %self.account.name, "no credentials configured, using anonymous access");
                Ok(StorageCredentials::Anonymous)
            }
            Err(e) => Err(e),
        }
    }

    pub fn request_options(&self) -> BlobRequestOptions {
        let r = &self.requests;
        BlobRequestOptions {
            server_timeout: r.server_timeout_secs.map(Duration::from_secs),
            maximum_execution_time: r.maximum_execution_time_secs.map(Duration::from_secs),
            maximum_download_buffer_size: r.maximum_download_buffer_size,
            location_mode: if self.account.read_from_secondary {
                LocationMode::PrimaryThenSecondary
            } else {
                LocationMode::PrimaryOnly
            },
            use_transactional_md5: r.use_transactional_md5,
            store_blob_content_md5: r.store_blob_content_md5,
            disable_content_md5_validation: r.disable_content_md5_validation,
            parallelism_factor: r.parallelism_factor,
            block_size: r.block_size,
            absorb_conditional_errors_on_retry: r.absorb_conditional_errors_on_retry,
        }
    }

    pub fn retry_policy(&self) -> Box<dyn RetryPolicy> {
        let delta = Duration::from_secs_f64(self.retry.delta_secs.max(0.0));
        match self.retry.policy {
            RetryPolicyKind::Exponential => {
                Box::new(ExponentialRetry::new(delta, self.retry.max_attempts))
            }
            RetryPolicyKind::Linear => Box::new(LinearRetry::new(delta, self.retry.max_attempts)),
            RetryPolicyKind::None => Box::new(NoRetry),
        }
    }

    /// Client over the default transport with everything above applied.
    pub fn client(&self) -> Result<CloudBlobClient> {
        let options = self.request_options();
        options.validate()?;
        Ok(CloudBlobClient::new(self.endpoint()?, self.credentials()?)
            .with_boxed_retry_policy(self.retry_policy())
            .with_default_options(options))
    }
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

// -- Tests -------------------------------------------------------------------
