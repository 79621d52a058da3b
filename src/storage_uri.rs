//! Primary/secondary endpoint addressing.

use reqwest::Url;

use crate::errors::{Result, StorageError};

/// Percent-encoding set for blob and container names: encode everything
/// except unreserved characters and '/' (the service treats '/' in blob
/// names as a virtual directory separator).
pub const BLOB_ENCODE_SET: percent_encoding::AsciiSet = percent_encoding::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// One of the two endpoints of a storage account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageLocation {
    Primary,
    Secondary,
}

/// How the executor picks locations across retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocationMode {
    /// Every attempt goes to the primary endpoint.
    #[default]
    PrimaryOnly,
    /// Start at the primary endpoint and alternate with the secondary on
    /// retries, for commands that allow it.
    PrimaryThenSecondary,
}

/// Which locations a command may be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AllowedStorageLocation {
    /// Writes and anything that must observe the latest state.
    #[default]
    PrimaryOnly,
    /// Reads that tolerate the replication lag of the secondary.
    PrimaryOrSecondary,
}

/// A resource address at the primary and, optionally, secondary endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageUri {
    pub primary: Url,
    pub secondary: Option<Url>,
}

impl StorageUri {
    /// Address with only a primary endpoint.
    pub fn new(primary: Url) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    /// Address with both endpoints.
    pub fn with_secondary(primary: Url, secondary: Url) -> Self {
        Self {
            primary,
            secondary: Some(secondary),
        }
    }

    /// Parse a primary endpoint URL.
    pub fn parse(primary: &str) -> Result<Self> {
        let url = Url::parse(primary)
            .map_err(|e| StorageError::invalid_argument(format!("invalid URL {primary}: {e}")))?;
        Ok(Self::new(url))
    }

    /// The URL for `location`, if that endpoint is configured.
    pub fn location(&self, location: StorageLocation) -> Option<&Url> {
        match location {
            StorageLocation::Primary => Some(&self.primary),
            StorageLocation::Secondary => self.secondary.as_ref(),
        }
    }

    /// A new address with `segment` (un-encoded) appended to the path of
    /// both endpoints.
    pub fn append_path(&self, segment: &str) -> StorageUri {
        StorageUri {
            primary: append_segment(&self.primary, segment),
            secondary: self.secondary.as_ref().map(|u| append_segment(u, segment)),
        }
    }
}

fn append_segment(base: &Url, segment: &str) -> Url {
    let encoded = percent_encoding::utf8_percent_encode(segment, &BLOB_ENCODE_SET).to_string();
    let mut url = base.clone();
    let path = format!("{}/{}", base.path().trim_end_matches('/'), encoded);
    url.set_path(&path);
    url
}

/// Pick the location for the first attempt.
pub fn initial_location(mode: LocationMode, allowed: AllowedStorageLocation) -> StorageLocation {
    match (mode, allowed) {
        (LocationMode::PrimaryOnly, _) => StorageLocation::Primary,
        (LocationMode::PrimaryThenSecondary, _) => StorageLocation::Primary,
    }
}

/// Pick the location the retry policy should consider after a failure at
/// `current`.
pub fn next_location(
    current: StorageLocation,
    mode: LocationMode,
    allowed: AllowedStorageLocation,
    uri: &StorageUri,
) -> StorageLocation {
    match (mode, allowed) {
        (LocationMode::PrimaryThenSecondary, AllowedStorageLocation::PrimaryOrSecondary)
            if uri.secondary.is_some() =>
        {
            match current {
                StorageLocation::Primary => StorageLocation::Secondary,
                StorageLocation::Secondary => StorageLocation::Primary,
            }
        }
        _ => StorageLocation::Primary,
    }
}
