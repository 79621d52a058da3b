//! Entry point for talking to one storage account's blob endpoint.

use bytes::Bytes;
use std::sync::Arc;

use crate::command::{ResponseParser, RequestSpec, StorageCommand};
use crate::container::CloudBlobContainer;
use crate::credentials::StorageCredentials;
use crate::errors::Result;
use crate::executor::Executor;
use crate::models::{ContainerItem, ContinuationToken, ResultSegment};
use crate::operation_context::OperationContext;
use crate::request_factory;
use crate::request_options::{BlobRequestOptions, CallOptions};
use crate::retry::RetryPolicy;
use crate::storage_uri::{StorageLocation, StorageUri};
use crate::transport::{ReqwestTransport, ResponseHead, Transport};
use crate::xml;

/// What list-containers should return besides names and properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContainerListingDetails {
    #[default]
    None,
    Metadata,
}

/// Client for the blob service of one account.  Cheap to clone; clones
/// share the transport.
#[derive(Clone)]
pub struct CloudBlobClient {
    base_uri: StorageUri,
    credentials: StorageCredentials,
    executor: Executor,
    default_options: BlobRequestOptions,
}

impl CloudBlobClient {
    /// Client using the default `reqwest` transport.
    pub fn new(base_uri: StorageUri, credentials: StorageCredentials) -> Self {
        Self::with_transport(base_uri, credentials, Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(
        base_uri: StorageUri,
        credentials: StorageCredentials,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            base_uri,
            credentials,
            executor: Executor::new(transport),
            default_options: BlobRequestOptions::default(),
        }
    }

    /// Retry policy used by operations whose context does not carry one.
    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.executor = self.executor.with_retry_policy(policy);
        self
    }

    pub fn with_boxed_retry_policy(mut self, policy: Box<dyn RetryPolicy>) -> Self {
        self.executor = self.executor.with_boxed_retry_policy(policy);
        self
    }

    pub fn with_default_options(mut self, options: BlobRequestOptions) -> Self {
        self.default_options = options;
        self
    }

    pub fn base_uri(&self) -> &StorageUri {
        &self.base_uri
    }

    pub fn credentials(&self) -> &StorageCredentials {
        &self.credentials
    }

    pub fn default_options(&self) -> &BlobRequestOptions {
        &self.default_options
    }

    pub fn container_reference(&self, name: &str) -> CloudBlobContainer {
        CloudBlobContainer::new(self.clone(), name)
    }

    /// One page of containers.  Pass the previous page's token to continue.
    pub async fn list_containers_segmented(
        &self,
        prefix: Option<&str>,
        details: ContainerListingDetails,
        max_results: Option<u32>,
        token: Option<&ContinuationToken>,
        call: &CallOptions,
    ) -> Result<ResultSegment<ContainerItem>> {
        let spec = request_factory::list_containers(
            prefix,
            details == ContainerListingDetails::Metadata,
            max_results,
            token.map(|t| t.next_marker.as_str()),
        );
        let (uri, pinned) = self.listing_uri(&self.base_uri, token);
        let cmd = self.command(uri, spec, parse_container_listing).readable_from_secondary();
        let (options, ctx) = self.resolve(call)?;
        let (items, marker) = self.executor.execute(&cmd, &options, &ctx).await?;
        Ok(segment(items, marker, &ctx, pinned))
    }

    // -- Plumbing shared by containers and blobs ------------------------------

    /// Continue a listing at the location that produced `token`.  Returns
    /// the address to use and the location it is pinned to, if any.
    pub(crate) fn listing_uri(
        &self,
        uri: &StorageUri,
        token: Option<&ContinuationToken>,
    ) -> (StorageUri, Option<StorageLocation>) {
        match (token.map(|t| t.target_location), &uri.secondary) {
            (Some(StorageLocation::Secondary), Some(secondary)) => (
                StorageUri::new(secondary.clone()),
                Some(StorageLocation::Secondary),
            ),
            _ => (uri.clone(), None),
        }
    }

    pub(crate) fn command<T>(
        &self,
        uri: StorageUri,
        spec: RequestSpec,
        parser: ResponseParser<T>,
    ) -> StorageCommand<T> {
        StorageCommand::new(uri, self.credentials.clone(), spec, parser)
    }

    /// Effective options and context for one call.
    pub(crate) fn resolve(&self, call: &CallOptions) -> Result<(BlobRequestOptions, OperationContext)> {
        let options = self
            .default_options
            .apply_defaults(call.request_options.as_ref());
        options.validate()?;
        let ctx = call.operation_context.clone().unwrap_or_default();
        Ok((options, ctx))
    }

    pub(crate) fn executor(&self) -> &Executor {
        &self.executor
    }

    pub(crate) async fn execute<T: Send>(&self, cmd: StorageCommand<T>, call: &CallOptions) -> Result<T> {
        let (options, ctx) = self.resolve(call)?;
        self.executor.execute(&cmd, &options, &ctx).await
    }
}

pub(crate) fn segment<T>(
    results: Vec<T>,
    marker: Option<String>,
    ctx: &OperationContext,
    pinned: Option<StorageLocation>,
) -> ResultSegment<T> {
    let location = pinned
        .or_else(|| ctx.last_result().map(|r| r.target_location))
        .unwrap_or(StorageLocation::Primary);
    ResultSegment {
        results,
        continuation_token: marker.map(|next_marker| ContinuationToken {
            next_marker,
            target_location: location,
        }),
    }
}

fn parse_container_listing(
    _head: &ResponseHead,
    body: Bytes,
) -> Result<(Vec<ContainerItem>, Option<String>)> {
    xml::parse_list_containers(&body)
}

// -- Tests -------------------------------------------------------------------
