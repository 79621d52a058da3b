//! blobkit: client library for a REST/XML cloud blob-storage service.
//!
//! Every operation is a [`StorageCommand`] run by the [`Executor`], which
//! handles retries, primary/secondary location selection and the overall
//! time budget.  On top of that sit the caller-facing references
//! ([`CloudBlobClient`], [`CloudBlobContainer`], [`CloudBlobDirectory`]
//! and the typed blobs), chunked parallel uploads through [`UploadHelper`]
//! and bounded streaming downloads through [`StreamDownloadBuffer`].

pub mod auth;
pub mod blob;
pub mod client;
pub mod command;
pub mod config;
pub mod constants;
pub mod container;
pub mod credentials;
pub mod directory;
pub mod download_buffer;
pub mod errors;
pub mod executor;
pub mod metrics;
pub mod models;
pub mod operation_context;
pub mod request_factory;
pub mod request_options;
pub mod request_result;
pub mod retry;
pub mod storage_uri;
pub mod streams;
pub mod transport;
pub mod upload;
pub mod xml;

#[cfg(test)]
pub mod test_support;

pub use blob::{CloudAppendBlob, CloudBlob, CloudBlockBlob, CloudPageBlob};
pub use client::{CloudBlobClient, ContainerListingDetails};
pub use command::{DownloadTarget, RequestSpec, StorageCommand};
pub use container::CloudBlobContainer;
pub use credentials::StorageCredentials;
pub use directory::CloudBlobDirectory;
pub use download_buffer::StreamDownloadBuffer;
pub use errors::{Result, StorageError};
pub use executor::Executor;
pub use models::{
    AccessCondition, BlobAttributes, BlobListingDetails, BlobProperties, BlobType,
    BlockListItem, BlockListMode, BlockListingFilter, ContainerPermissions,
    ContainerPublicAccess, ContinuationToken, DeleteSnapshotsOption, ListBlobItem, Metadata,
    PageRange, ResultSegment, SequenceNumberAction, SharedAccessPermissions, SharedAccessPolicy,
};
pub use operation_context::OperationContext;
pub use request_options::{BlobRequestOptions, CallOptions};
pub use request_result::RequestResult;
pub use retry::{ExponentialRetry, LinearRetry, NoRetry, RetryPolicy};
pub use storage_uri::{LocationMode, StorageLocation, StorageUri};
pub use streams::{BlobInputStream, BlobOutputStream};
pub use transport::{ReqwestTransport, Transport};
pub use upload::{ChunkUploader, UploadHelper};
