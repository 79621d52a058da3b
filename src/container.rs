//! Container operations and blob references.

use bytes::Bytes;
use http::StatusCode;
use std::time::Duration;

use crate::blob::{CloudAppendBlob, CloudBlob, CloudBlockBlob, CloudPageBlob};
use crate::client::{segment, CloudBlobClient};
use crate::command::{parse_created, parse_exists, parse_unit};
use crate::constants::{
    HEADER_BLOB_PUBLIC_ACCESS, HEADER_LEASE_ID, HEADER_LEASE_TIME, MAX_SHARED_ACCESS_POLICIES,
};
use crate::directory::CloudBlobDirectory;
use crate::errors::{Result, StorageError};
use crate::models::{
    metadata_from_headers, AccessCondition, BlobListingDetails, BlobType, ContainerAttributes,
    ContainerPermissions, ContainerProperties, ContainerPublicAccess, ContinuationToken,
    ListBlobItem, Metadata, ResultSegment,
};
use crate::request_factory::{self, LeaseAction};
use crate::request_options::CallOptions;
use crate::storage_uri::StorageUri;
use crate::transport::ResponseHead;
use crate::xml;

/// A container in the account.  Holding a reference does not touch the
/// service.
#[derive(Clone)]
pub struct CloudBlobContainer {
    client: CloudBlobClient,
    name: String,
    uri: StorageUri,
}

impl CloudBlobContainer {
    pub(crate) fn new(client: CloudBlobClient, name: &str) -> Self {
        let uri = client.base_uri().append_path(name);
        Self {
            client,
            name: name.to_string(),
            uri,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uri(&self) -> &StorageUri {
        &self.uri
    }

    pub fn client(&self) -> &CloudBlobClient {
        &self.client
    }

    // ── Blob references ─────────────────────────────────────────────

    /// Reference to a blob whose type is not known yet.
    pub fn blob_reference(&self, name: &str) -> CloudBlob {
        CloudBlob::new(self.clone(), name, BlobType::Unspecified)
    }

    pub fn block_blob_reference(&self, name: &str) -> CloudBlockBlob {
        CloudBlockBlob::from(CloudBlob::new(self.clone(), name, BlobType::BlockBlob))
    }

    pub fn page_blob_reference(&self, name: &str) -> CloudPageBlob {
        CloudPageBlob::from(CloudBlob::new(self.clone(), name, BlobType::PageBlob))
    }

    pub fn append_blob_reference(&self, name: &str) -> CloudAppendBlob {
        CloudAppendBlob::from(CloudBlob::new(self.clone(), name, BlobType::AppendBlob))
    }

    /// Virtual directory at `name`; a trailing delimiter is added when
    /// missing.
    pub fn directory_reference(&self, name: &str) -> CloudBlobDirectory {
        CloudBlobDirectory::new(self.clone(), name)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    pub async fn create(&self, call: &CallOptions) -> Result<()> {
        self.create_with(ContainerPublicAccess::Off, &Metadata::new(), call)
            .await
    }

    pub async fn create_with(
        &self,
        access: ContainerPublicAccess,
        metadata: &Metadata,
        call: &CallOptions,
    ) -> Result<()> {
        let spec = request_factory::create_container(metadata, access);
        let cmd = self.client.command(self.uri.clone(), spec, parse_unit);
        self.client.execute(cmd, call).await
    }

    /// Create the container unless it exists.  Returns whether it was
    /// created.
    pub async fn create_if_not_exists(&self, call: &CallOptions) -> Result<bool> {
        let spec = request_factory::create_container(&Metadata::new(), ContainerPublicAccess::Off);
        let cmd = self
            .client
            .command(self.uri.clone(), spec, parse_created)
            .accept_status(StatusCode::CONFLICT);
        self.client.execute(cmd, call).await
    }

    pub async fn delete(&self, call: &CallOptions) -> Result<()> {
        let spec = request_factory::delete_container(call.access_condition.as_ref());
        let cmd = self.client.command(self.uri.clone(), spec, parse_unit);
        self.client.execute(cmd, call).await
    }

    /// Delete the container if it exists.  Returns whether it was deleted.
    pub async fn delete_if_exists(&self, call: &CallOptions) -> Result<bool> {
        let spec = request_factory::delete_container(call.access_condition.as_ref());
        let cmd = self
            .client
            .command(self.uri.clone(), spec, parse_exists)
            .accept_status(StatusCode::NOT_FOUND);
        self.client.execute(cmd, call).await
    }

    pub async fn exists(&self, call: &CallOptions) -> Result<bool> {
        let spec = request_factory::container_properties(None);
        let cmd = self
            .client
            .command(self.uri.clone(), spec, parse_exists)
            .accept_status(StatusCode::NOT_FOUND)
            .readable_from_secondary();
        self.client.execute(cmd, call).await
    }

    pub async fn fetch_attributes(&self, call: &CallOptions) -> Result<ContainerAttributes> {
        let spec = request_factory::container_properties(call.access_condition.as_ref());
        let cmd = self
            .client
            .command(self.uri.clone(), spec, parse_container_attributes)
            .readable_from_secondary();
        self.client.execute(cmd, call).await
    }

    /// Replace the container's metadata.
    pub async fn upload_metadata(&self, metadata: &Metadata, call: &CallOptions) -> Result<()> {
        let spec = request_factory::set_container_metadata(metadata, call.access_condition.as_ref());
        let cmd = self.client.command(self.uri.clone(), spec, parse_unit);
        self.client.execute(cmd, call).await
    }

    // ── Permissions ─────────────────────────────────────────────────

    /// Public access level and stored access policies.
    pub async fn download_permissions(&self, call: &CallOptions) -> Result<ContainerPermissions> {
        let spec = request_factory::get_container_acl(call.access_condition.as_ref());
        let cmd = self
            .client
            .command(self.uri.clone(), spec, parse_permissions)
            .readable_from_secondary();
        self.client.execute(cmd, call).await
    }

    /// Replace the public access level and every stored access policy.
    pub async fn upload_permissions(
        &self,
        permissions: &ContainerPermissions,
        call: &CallOptions,
    ) -> Result<()> {
        if permissions.shared_access_policies.len() > MAX_SHARED_ACCESS_POLICIES {
            return Err(StorageError::invalid_argument(format!(
                "a container holds at most {MAX_SHARED_ACCESS_POLICIES} stored access policies"
            )));
        }
        let body = xml::render_signed_identifiers(&permissions.shared_access_policies)?;
        let spec = request_factory::set_container_acl(
            body,
            permissions.public_access,
            call.access_condition.as_ref(),
        );
        let cmd = self.client.command(self.uri.clone(), spec, parse_unit);
        self.client.execute(cmd, call).await
    }

    // ── Listing ─────────────────────────────────────────────────────

    /// One page of blobs.  A flat listing returns every blob; otherwise
    /// names are grouped into virtual directories at `/`.
    pub async fn list_blobs_segmented(
        &self,
        prefix: Option<&str>,
        flat: bool,
        details: BlobListingDetails,
        max_results: Option<u32>,
        token: Option<&ContinuationToken>,
        call: &CallOptions,
    ) -> Result<ResultSegment<ListBlobItem>> {
        if details.snapshots && !flat {
            return Err(StorageError::invalid_argument(
                "listing snapshots requires a flat listing",
            ));
        }
        let spec = request_factory::list_blobs(
            prefix,
            flat,
            details,
            max_results,
            token.map(|t| t.next_marker.as_str()),
        );
        let (uri, pinned) = self.client.listing_uri(&self.uri, token);
        let cmd = self
            .client
            .command(uri, spec, parse_blob_listing)
            .readable_from_secondary();
        let (options, ctx) = self.client.resolve(call)?;
        let (items, marker) = self.client.executor().execute(&cmd, &options, &ctx).await?;
        Ok(segment(items, marker, &ctx, pinned))
    }

    // ── Leases ──────────────────────────────────────────────────────

    /// Acquire a lease; `None` duration is infinite.  Returns the lease id.
    pub async fn acquire_lease(
        &self,
        duration: Option<Duration>,
        proposed_lease_id: Option<&str>,
        call: &CallOptions,
    ) -> Result<String> {
        let action = LeaseAction::Acquire {
            duration,
            proposed_lease_id: proposed_lease_id.map(str::to_string),
        };
        self.lease(action, call.access_condition.clone(), call, parse_lease_id)
            .await
    }

    pub async fn renew_lease(&self, lease_id: &str, call: &CallOptions) -> Result<()> {
        let condition = with_lease(call, lease_id);
        self.lease(LeaseAction::Renew, Some(condition), call, parse_unit)
            .await
    }

    /// Returns the new lease id.
    pub async fn change_lease(
        &self,
        lease_id: &str,
        proposed_lease_id: &str,
        call: &CallOptions,
    ) -> Result<String> {
        let action = LeaseAction::Change {
            proposed_lease_id: proposed_lease_id.to_string(),
        };
        self.lease(action, Some(with_lease(call, lease_id)), call, parse_lease_id)
            .await
    }

    pub async fn release_lease(&self, lease_id: &str, call: &CallOptions) -> Result<()> {
        self.lease(LeaseAction::Release, Some(with_lease(call, lease_id)), call, parse_unit)
            .await
    }

    /// Returns the time remaining before the lease can be re-acquired.
    pub async fn break_lease(
        &self,
        break_period: Option<Duration>,
        call: &CallOptions,
    ) -> Result<Duration> {
        let action = LeaseAction::Break { break_period };
        self.lease(action, call.access_condition.clone(), call, parse_lease_time)
            .await
    }

    async fn lease<T: Send>(
        &self,
        action: LeaseAction,
        condition: Option<AccessCondition>,
        call: &CallOptions,
        parser: crate::command::ResponseParser<T>,
    ) -> Result<T> {
        let spec = request_factory::container_lease(&action, condition.as_ref());
        let cmd = self.client.command(self.uri.clone(), spec, parser);
        self.client.execute(cmd, call).await
    }
}

/// The call's access condition with `lease_id` filled in.
pub(crate) fn with_lease(call: &CallOptions, lease_id: &str) -> AccessCondition {
    AccessCondition {
        lease_id: Some(lease_id.to_string()),
        ..call.access_condition.clone().unwrap_or_default()
    }
}

pub(crate) fn parse_lease_id(head: &ResponseHead, _body: Bytes) -> Result<String> {
    head.header(HEADER_LEASE_ID)
        .map(str::to_string)
        .ok_or_else(|| StorageError::parse("lease response without x-ms-lease-id"))
}

pub(crate) fn parse_lease_time(head: &ResponseHead, _body: Bytes) -> Result<Duration> {
    let secs = head
        .header(HEADER_LEASE_TIME)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| StorageError::parse("break lease response without x-ms-lease-time"))?;
    Ok(Duration::from_secs(secs))
}

fn parse_container_attributes(head: &ResponseHead, _body: Bytes) -> Result<ContainerAttributes> {
    Ok(ContainerAttributes {
        properties: ContainerProperties::from_headers(head),
        metadata: metadata_from_headers(head),
    })
}

fn parse_permissions(head: &ResponseHead, body: Bytes) -> Result<ContainerPermissions> {
    Ok(ContainerPermissions {
        public_access: ContainerPublicAccess::parse(
            head.header(HEADER_BLOB_PUBLIC_ACCESS).unwrap_or_default(),
        ),
        shared_access_policies: xml::parse_signed_identifiers(&body)?,
    })
}

fn parse_blob_listing(_head: &ResponseHead, body: Bytes) -> Result<(Vec<ListBlobItem>, Option<String>)> {
    xml::parse_list_blobs(&body)
}

// -- Tests -------------------------------------------------------------------
