//! src/services/gateway_service.rs
//!
//! GatewayService: the S3-shaped operations. Each one authorizes through
//! the catalog, moves bytes through the blob client, and orders the two so
//! that a failure never leaves the catalog pointing at bytes that were not
//! written:
//!
//! - put-object writes the blob first and records the key only after the
//!   backend returned an identifier;
//! - delete-object drops an object association only after the backend
//!   echoed its identifier, and drops the key only once none are left.
//!
//! Nothing here is transactional. A crash between steps leaves an orphaned
//! blob or a key with fewer associations, both of which are logged.

use crate::models::{
    account::Account,
    bucket::{Bucket, BucketCreation},
    object::{DEFAULT_CONTENT_TYPE, KeyRecord, ObjectEntry},
};
use crate::services::{
    blob_client::{BlobClient, BlobStream, TransportError},
    catalog::{Catalog, CatalogError},
    metadata_store::StoreError,
};
use bytes::Bytes;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Coarse error class the HTTP adapter maps to a status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    AccessDenied,
    NotFound,
    Conflict,
    TransportFailure,
    PartialFailure,
    Internal,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(
        "deleted {deleted} of {total} objects under `{bucket}/{key}`; the rest remain and the delete can be retried"
    )]
    PartialDelete {
        bucket: String,
        key: String,
        deleted: usize,
        total: usize,
    },
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::Catalog(CatalogError::Store(err))
    }
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Catalog(err) => match err {
                CatalogError::InvalidBucketName { .. } => ErrorKind::InvalidInput,
                CatalogError::AccessDenied(_) => ErrorKind::AccessDenied,
                CatalogError::NoSuchBucket(_) | CatalogError::NoSuchKey { .. } => {
                    ErrorKind::NotFound
                }
                CatalogError::BucketNotEmpty(_) | CatalogError::BucketAlreadyExists(_) => {
                    ErrorKind::Conflict
                }
                CatalogError::Store(_) => ErrorKind::Internal,
            },
            GatewayError::Transport(_) => ErrorKind::TransportFailure,
            GatewayError::PartialDelete { .. } => ErrorKind::PartialFailure,
        }
    }

    /// S3 error code reported to clients.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Catalog(err) => match err {
                CatalogError::InvalidBucketName { .. } => "InvalidBucketName",
                CatalogError::AccessDenied(_) => "AccessDenied",
                CatalogError::NoSuchBucket(_) => "NoSuchBucket",
                CatalogError::NoSuchKey { .. } => "NoSuchKey",
                CatalogError::BucketNotEmpty(_) => "BucketNotEmpty",
                CatalogError::BucketAlreadyExists(_) => "BucketAlreadyExists",
                CatalogError::Store(_) => "InternalError",
            },
            GatewayError::Transport(_) => "ServiceUnavailable",
            GatewayError::PartialDelete { .. } => "InternalError",
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Response of list-buckets.
#[derive(Debug)]
pub struct BucketListing {
    pub owner: Account,
    pub buckets: Vec<Bucket>,
}

/// Response of list-bucket-contents.
#[derive(Debug)]
pub struct BucketContents {
    pub bucket: String,
    pub owner: Account,
    pub objects: Vec<ObjectEntry>,
}

/// An object being read: its record plus the body as it arrives from the
/// backend.
pub struct ObjectDownload {
    pub record: KeyRecord,
    pub body: BlobStream,
}

/// Composes the catalog and the blob client into gateway operations.
#[derive(Clone)]
pub struct GatewayService {
    pub catalog: Catalog,
    pub blobs: BlobClient,
}

impl GatewayService {
    pub fn new(catalog: Catalog, blobs: BlobClient) -> Self {
        Self { catalog, blobs }
    }

    pub async fn create_bucket(&self, bucket: &str, account: &str) -> GatewayResult<BucketCreation> {
        let outcome = self.catalog.create_bucket(bucket, account).await?;
        info!(bucket, account, ?outcome, "create bucket");
        Ok(outcome)
    }

    pub async fn list_buckets(&self, account: &str) -> GatewayResult<BucketListing> {
        Ok(BucketListing {
            owner: self.catalog.account(account),
            buckets: self.catalog.list_buckets(account).await?,
        })
    }

    /// List every key of `bucket`.
    ///
    /// A bucket nobody created lists as empty; a bucket owned by someone else
    /// is `AccessDenied`.
    pub async fn list_bucket_contents(
        &self,
        bucket: &str,
        account: &str,
    ) -> GatewayResult<BucketContents> {
        let owner = self.catalog.account(account);
        if !self.catalog.exists(bucket).await? {
            debug!(bucket, "listing unknown bucket as empty");
            return Ok(BucketContents {
                bucket: bucket.to_string(),
                owner,
                objects: Vec::new(),
            });
        }
        if !self.catalog.can_read(bucket, account).await? {
            return Err(CatalogError::AccessDenied(bucket.to_string()).into());
        }
        Ok(BucketContents {
            bucket: bucket.to_string(),
            owner,
            objects: self.catalog.list_key_records(bucket).await?,
        })
    }

    /// Store `payload` under `bucket/key`, replacing whatever the key held.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        account: &str,
        payload: Bytes,
        content_type: Option<String>,
    ) -> GatewayResult<KeyRecord> {
        self.authorize_write(bucket, account).await?;

        let size = payload.len() as u64;
        let etag = format!("{:x}", md5::compute(&payload));
        let object_id = self.blobs.put(payload).await?;

        let record = KeyRecord {
            object_id,
            size,
            content_type: content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            etag,
            last_modified: Utc::now(),
        };
        if let Err(err) = self.catalog.put_key(bucket, key, account, &record).await {
            warn!(
                bucket,
                key,
                object_id = %record.object_id,
                error = %err,
                "blob written but key not recorded; object is orphaned"
            );
            return Err(err.into());
        }

        info!(bucket, key, account, object_id = %record.object_id, size, "put object");
        Ok(record)
    }

    pub async fn head_object(&self, bucket: &str, key: &str, account: &str) -> GatewayResult<KeyRecord> {
        self.authorize_read(bucket, account).await?;
        self.catalog
            .key_record(bucket, key)
            .await?
            .ok_or_else(|| no_such_key(bucket, key))
    }

    /// Open the current object of `bucket/key` for streaming.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        account: &str,
    ) -> GatewayResult<ObjectDownload> {
        let record = self.head_object(bucket, key, account).await?;
        let body = self.blobs.get(&record.object_id).await?;
        debug!(bucket, key, object_id = %record.object_id, "get object");
        Ok(ObjectDownload { record, body })
    }

    /// Delete every object bound to `bucket/key`, then the key itself.
    ///
    /// Associations are dropped one by one as the backend confirms them, so
    /// a retry after `PartialDelete` only touches what is left.
    pub async fn delete_object(&self, bucket: &str, key: &str, account: &str) -> GatewayResult<()> {
        self.authorize_write(bucket, account).await?;
        if !self.catalog.key_exists(bucket, key).await? {
            return Err(no_such_key(bucket, key));
        }

        let object_ids = self.catalog.key_objects(bucket, key).await?;
        let total = object_ids.len();
        let mut deleted = 0;
        for object_id in object_ids {
            match self.blobs.delete(&object_id).await {
                Ok(echoed) if echoed == object_id => {
                    self.catalog
                        .delete_key_object(bucket, key, &object_id)
                        .await?;
                    deleted += 1;
                }
                Ok(echoed) => warn!(
                    bucket,
                    key,
                    object_id = %object_id,
                    echoed = %echoed,
                    "backend did not confirm delete"
                ),
                Err(err) => warn!(
                    bucket,
                    key,
                    object_id = %object_id,
                    error = %err,
                    "blob delete failed"
                ),
            }
        }

        if deleted < total {
            return Err(GatewayError::PartialDelete {
                bucket: bucket.to_string(),
                key: key.to_string(),
                deleted,
                total,
            });
        }

        self.catalog.delete_key(bucket, key, account).await?;
        info!(bucket, key, account, objects = total, "delete object");
        Ok(())
    }

    /// Delete an empty bucket. A bucket that still holds keys is
    /// `BucketNotEmpty` whoever asks.
    pub async fn delete_bucket(&self, bucket: &str, account: &str) -> GatewayResult<()> {
        if !self.catalog.exists(bucket).await? {
            return Err(CatalogError::NoSuchBucket(bucket.to_string()).into());
        }
        if !self.catalog.is_bucket_empty(bucket).await? {
            return Err(CatalogError::BucketNotEmpty(bucket.to_string()).into());
        }
        if !self.catalog.is_owner(bucket, account).await? {
            return Err(CatalogError::AccessDenied(bucket.to_string()).into());
        }
        if !self.catalog.delete_bucket(bucket, account).await? {
            // A key landed between the emptiness check and the delete.
            return Err(CatalogError::BucketNotEmpty(bucket.to_string()).into());
        }
        info!(bucket, account, "delete bucket");
        Ok(())
    }

    /// Readiness of the metadata store.
    pub async fn check_store(&self) -> GatewayResult<()> {
        Ok(self.catalog.store().ping().await?)
    }

    /// Readiness of the blob backend.
    pub async fn check_backend(&self) -> GatewayResult<()> {
        Ok(self.blobs.probe().await?)
    }

    async fn authorize_read(&self, bucket: &str, account: &str) -> GatewayResult<()> {
        if self.catalog.can_read(bucket, account).await? {
            return Ok(());
        }
        Err(self.denial(bucket).await?)
    }

    async fn authorize_write(&self, bucket: &str, account: &str) -> GatewayResult<()> {
        if self.catalog.can_write(bucket, account).await? {
            return Ok(());
        }
        Err(self.denial(bucket).await?)
    }

    /// `NoSuchBucket` for a bucket nobody owns, `AccessDenied` otherwise.
    async fn denial(&self, bucket: &str) -> GatewayResult<GatewayError> {
        let err = if self.catalog.exists(bucket).await? {
            CatalogError::AccessDenied(bucket.to_string())
        } else {
            CatalogError::NoSuchBucket(bucket.to_string())
        };
        Ok(err.into())
    }
}

fn no_such_key(bucket: &str, key: &str) -> GatewayError {
    CatalogError::NoSuchKey {
        bucket: bucket.to_string(),
        key: key.to_string(),
    }
    .into()
}
