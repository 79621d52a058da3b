//! Virtual directories.
//!
//! The service has no directories: a directory is a blob-name prefix that
//! ends in the `/` delimiter.  A [`CloudBlobDirectory`] scopes blob
//! references and listings to that prefix.

use crate::blob::{CloudAppendBlob, CloudBlob, CloudBlockBlob, CloudPageBlob};
use crate::constants::DEFAULT_DELIMITER;
use crate::container::CloudBlobContainer;
use crate::errors::Result;
use crate::models::{BlobListingDetails, ContinuationToken, ListBlobItem, ResultSegment};
use crate::request_options::CallOptions;
use crate::storage_uri::StorageUri;

/// A prefix inside a container.  Holding a reference does not touch the
/// service.
#[derive(Clone)]
pub struct CloudBlobDirectory {
    container: CloudBlobContainer,
    prefix: String,
    uri: StorageUri,
}

impl CloudBlobDirectory {
    pub(crate) fn new(container: CloudBlobContainer, name: &str) -> Self {
        let mut prefix = name.to_string();
        if !prefix.is_empty() && !prefix.ends_with(DEFAULT_DELIMITER) {
            prefix.push_str(DEFAULT_DELIMITER);
        }
        let uri = container.uri().append_path(&prefix);
        Self {
            container,
            prefix,
            uri,
        }
    }

    /// The directory's full prefix, delimiter included.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn container(&self) -> &CloudBlobContainer {
        &self.container
    }

    pub fn uri(&self) -> &StorageUri {
        &self.uri
    }

    pub fn blob_reference(&self, name: &str) -> CloudBlob {
        self.container.blob_reference(&self.child_name(name))
    }

    pub fn block_blob_reference(&self, name: &str) -> CloudBlockBlob {
        self.container.block_blob_reference(&self.child_name(name))
    }

    pub fn page_blob_reference(&self, name: &str) -> CloudPageBlob {
        self.container.page_blob_reference(&self.child_name(name))
    }

    pub fn append_blob_reference(&self, name: &str) -> CloudAppendBlob {
        self.container.append_blob_reference(&self.child_name(name))
    }

    /// `a/b/` with `c` gives `a/b/c/`.
    pub fn subdirectory_reference(&self, name: &str) -> CloudBlobDirectory {
        CloudBlobDirectory::new(self.container.clone(), &self.child_name(name))
    }

    /// `a/b/c/` gives `a/b/`.  A top-level directory has no parent
    /// directory, only its container.
    pub fn parent_reference(&self) -> Option<CloudBlobDirectory> {
        let trimmed = self.prefix.strip_suffix(DEFAULT_DELIMITER)?;
        let end = trimmed.rfind(DEFAULT_DELIMITER)?;
        Some(CloudBlobDirectory::new(
            self.container.clone(),
            &trimmed[..end + DEFAULT_DELIMITER.len()],
        ))
    }

    /// One page of the blobs under this directory.  A hierarchical listing
    /// stops at the next level of subdirectories.
    pub async fn list_blobs_segmented(
        &self,
        flat: bool,
        details: BlobListingDetails,
        max_results: Option<u32>,
        token: Option<&ContinuationToken>,
        call: &CallOptions,
    ) -> Result<ResultSegment<ListBlobItem>> {
        self.container
            .list_blobs_segmented(Some(&self.prefix), flat, details, max_results, token, call)
            .await
    }

    fn child_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}
