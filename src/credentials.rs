//! Account credentials.
//!
//! Resolution order for [`StorageCredentials::from_env`]:
//!   - `AZURE_STORAGE_KEY` (Shared Key auth, needs an account name)
//!   - `AZURE_STORAGE_CONNECTION_STRING` (`AccountName=` / `AccountKey=`)
//!   - `AZURE_STORAGE_SAS_TOKEN` (SAS token appended to every URL)

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use reqwest::Url;
use std::fmt;
use std::sync::Arc;

use crate::auth;
use crate::constants::HEADER_AUTHORIZATION;
use crate::errors::{Result, StorageError};
use crate::operation_context::OperationContext;
use crate::transport::HttpRequest;

/// How requests are authenticated.
#[derive(Clone)]
pub enum StorageCredentials {
    /// Shared Key: every request is signed with the decoded account key.
    SharedKey { account: String, key: Arc<[u8]> },
    /// A pre-issued SAS token (without the leading `?`).
    Sas { token: String },
    /// Public read access; nothing is added to requests.
    Anonymous,
}

impl fmt::Debug for StorageCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageCredentials::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .field("key", &"<redacted>")
                .finish(),
            StorageCredentials::Sas { .. } => f.debug_struct("Sas").finish_non_exhaustive(),
            StorageCredentials::Anonymous => f.write_str("Anonymous"),
        }
    }
}

impl StorageCredentials {
    /// Shared Key credentials from a base64-encoded account key.
    pub fn shared_key(account: impl Into<String>, key_base64: &str) -> Result<Self> {
        let key = BASE64_STANDARD.decode(key_base64.trim()).map_err(|e| {
            StorageError::invalid_argument(format!("account key is not valid base64: {e}"))
        })?;
        Ok(StorageCredentials::SharedKey {
            account: account.into(),
            key: key.into(),
        })
    }

    /// SAS credentials; a leading `?` is stripped.
    pub fn sas(token: impl Into<String>) -> Self {
        let token = token.into();
        let token = token.strip_prefix('?').map(str::to_string).unwrap_or(token);
        StorageCredentials::Sas { token }
    }

    /// Resolve credentials from the environment for `account`.
    pub fn from_env(account: &str) -> Result<Self> {
        if let Ok(key) = std::env::var("AZURE_STORAGE_KEY") {
            return Self::shared_key(account, &key);
        }

        if let Ok(conn_str) = std::env::var("AZURE_STORAGE_CONNECTION_STRING") {
            if let Some(creds) = Self::from_connection_string(&conn_str, account)? {
                return Ok(creds);
            }
        }

        if let Ok(sas) = std::env::var("AZURE_STORAGE_SAS_TOKEN") {
            return Ok(Self::sas(sas));
        }

        Err(StorageError::invalid_argument(
            "no storage credentials found; set AZURE_STORAGE_KEY, \
             AZURE_STORAGE_CONNECTION_STRING, or AZURE_STORAGE_SAS_TOKEN",
        ))
    }

    /// Extract Shared Key or SAS credentials from a connection string.
    /// `default_account` is used when the string names no account.
    pub fn from_connection_string(conn_str: &str, default_account: &str) -> Result<Option<Self>> {
        let mut account = default_account.to_string();
        let mut key = None;
        let mut sas = None;
        for part in conn_str.split(';') {
            if let Some(v) = part.strip_prefix("AccountName=") {
                account = v.to_string();
            } else if let Some(v) = part.strip_prefix("AccountKey=") {
                key = Some(v.to_string());
            } else if let Some(v) = part.strip_prefix("SharedAccessSignature=") {
                sas = Some(v.to_string());
            }
        }
        match (key, sas) {
            (Some(key), _) => Ok(Some(Self::shared_key(account, &key)?)),
            (None, Some(token)) => Ok(Some(Self::sas(token))),
            (None, None) => Ok(None),
        }
    }

    /// Account name, if the credentials carry one.
    pub fn account_name(&self) -> Option<&str> {
        match self {
            StorageCredentials::SharedKey { account, .. } => Some(account),
            _ => None,
        }
    }

    /// Append the SAS token to `url`.  Other credential kinds leave the
    /// URL unchanged.
    pub fn transform_url(&self, url: &mut Url) {
        if let StorageCredentials::Sas { token } = self {
            let merged = match url.query() {
                Some(q) if !q.is_empty() => format!("{q}&{token}"),
                _ => token.clone(),
            };
            url.set_query(Some(&merged));
        }
    }

    /// Add the `Authorization` header for Shared Key credentials.
    pub fn sign(&self, request: &mut HttpRequest, ctx: &OperationContext) -> Result<()> {
        if let StorageCredentials::SharedKey { account, key } = self {
            let value = auth::shared_key_authorization(request, account, key)?;
            request.set_header(HEADER_AUTHORIZATION, &value)?;
            tracing::trace!(
                parent: ctx.span(),
                string_to_sign = %auth::string_to_sign(request, account),
                "signed request"
            );
        }
        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------
