//! src/services/catalog.rs
//!
//! Catalog: the account → bucket → key → object bookkeeping kept in the
//! metadata store. It enforces bucket naming, single-owner access and the
//! "only empty buckets can be deleted" rule. It never talks to the blob
//! backend; `GatewayService` decides when catalog mutations happen relative
//! to blob writes and deletes.

use crate::models::{
    account::{Account, DEFAULT_ACCOUNT_ID},
    bucket::{Bucket, BucketCreation},
    object::{KeyRecord, ObjectEntry, ObjectId},
};
use crate::services::metadata_store::{MetadataStore, StoreError};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::{
    collections::BTreeSet,
    sync::{Arc, LazyLock},
};
use thiserror::Error;
use tracing::{debug, warn};

pub const BUCKET_NAME_PATTERN: &str = r"^[a-z0-9]+(.?[-a-z0-9]+)*$";
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;
const ACCOUNT_ID_LEN: usize = 7;

static BUCKET_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(BUCKET_NAME_PATTERN).unwrap_or_else(|err| panic!("bad bucket pattern: {err}"))
});

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("bucket `{bucket}` invalid: {reason}")]
    InvalidBucketName {
        bucket: String,
        reason: String,
        resource: String,
    },
    #[error("access to bucket `{0}` denied")]
    AccessDenied(String),
    #[error("bucket `{0}` not found")]
    NoSuchBucket(String),
    #[error("key `{key}` not found in bucket `{bucket}`")]
    NoSuchKey { bucket: String, key: String },
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("bucket `{0}` is owned by another account")]
    BucketAlreadyExists(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Store key layout.
///
/// Every key carries the `v2/` schema prefix and ends in a role suffix
/// (`buckets`, `owner`, `record`, ...). Account, bucket and key names are
/// passed through [`keys::segment`] first, so a name can never contain the
/// `/` separator and two different names never share a store key. Changing
/// the layout means a new prefix.
pub mod keys {
    const PREFIX: &str = "v2";

    /// Percent-encode `%` and `/` so `name` fits in one path segment.
    pub fn segment(name: &str) -> String {
        let mut out = String::with_capacity(name.len());
        for c in name.chars() {
            match c {
                '%' => out.push_str("%25"),
                '/' => out.push_str("%2F"),
                c => out.push(c),
            }
        }
        out
    }

    /// Set of every bucket name known to the gateway.
    pub fn all_buckets() -> String {
        format!("{PREFIX}/buckets")
    }

    /// Set of bucket names owned by `account`.
    pub fn account_buckets(account: &str) -> String {
        format!("{PREFIX}/accounts/{}/buckets", segment(account))
    }

    pub fn bucket_owner(bucket: &str) -> String {
        format!("{PREFIX}/buckets/{}/owner", segment(bucket))
    }

    pub fn bucket_creation_date(bucket: &str) -> String {
        format!("{PREFIX}/buckets/{}/creation_date", segment(bucket))
    }

    /// Set of key names stored in `bucket`.
    pub fn bucket_keys(bucket: &str) -> String {
        format!("{PREFIX}/buckets/{}/keys", segment(bucket))
    }

    /// JSON `KeyRecord` of the key's current object.
    pub fn key_record(bucket: &str, key: &str) -> String {
        format!(
            "{PREFIX}/buckets/{}/keys/{}/record",
            segment(bucket),
            segment(key)
        )
    }

    /// Set of every object id ever bound to the key and not yet deleted.
    pub fn key_objects(bucket: &str, key: &str) -> String {
        format!(
            "{PREFIX}/buckets/{}/keys/{}/objects",
            segment(bucket),
            segment(key)
        )
    }
}

/// Derive an account id from an `Authorization` header.
///
/// Expects `"<algo> Credential=<cred>, SignedHeaders=..., Signature=..."` and
/// returns the first 7 characters of `<cred>`. Anything else (including a
/// missing header) maps to [`DEFAULT_ACCOUNT_ID`]. No signature is verified.
pub fn resolve_account(authorization: Option<&str>) -> String {
    authorization
        .and_then(parse_account_id)
        .unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string())
}

fn parse_account_id(header: &str) -> Option<String> {
    let parts: Vec<&str> = header.split(',').collect();
    let [credential, _signed_headers, _signature] = parts.as_slice() else {
        return None;
    };
    let words: Vec<&str> = credential.trim().split(' ').collect();
    let [_algorithm, credential_var] = words.as_slice() else {
        return None;
    };
    let (name, value) = credential_var.split_once('=')?;
    if name != "Credential" || value.is_empty() || value.contains('=') {
        return None;
    }
    Some(value.chars().take(ACCOUNT_ID_LEN).collect())
}

/// Check a bucket name against the naming pattern and the 3–63 length range.
pub fn validate_bucket_name(name: &str) -> CatalogResult<()> {
    let invalid = |reason: String| CatalogError::InvalidBucketName {
        bucket: name.to_string(),
        reason,
        resource: format!("/{name}"),
    };

    if !BUCKET_NAME_RE.is_match(name) {
        return Err(invalid(format!(
            "The bucket name {name} must match {BUCKET_NAME_PATTERN}"
        )));
    }
    let len = name.chars().count();
    if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
        return Err(invalid(format!(
            "The bucket name {name} must be between {BUCKET_NAME_MIN_LEN} and {BUCKET_NAME_MAX_LEN} characters long"
        )));
    }
    Ok(())
}

/// Domain view over an injected [`MetadataStore`].
#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn MetadataStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    /// The owner shown in listings. Display names are never stored, so the
    /// name is always the account id.
    pub fn account(&self, account_id: &str) -> Account {
        Account::with_default_name(account_id)
    }

    /// Create `name` for `account_id`.
    ///
    /// Adding the name to the global registry is the claim: only the caller
    /// whose `set_add` inserted it goes on to write owner, creation date and
    /// the account membership that grants access. If one of those writes
    /// fails the claim is released.
    pub async fn create_bucket(&self, name: &str, account_id: &str) -> CatalogResult<BucketCreation> {
        validate_bucket_name(name)?;

        if !self.store.set_add(&keys::all_buckets(), name).await? {
            if self.is_owner(name, account_id).await? {
                return Ok(BucketCreation::AlreadyOwned);
            }
            return Err(CatalogError::BucketAlreadyExists(name.to_string()));
        }

        if let Err(err) = self.record_bucket(name, account_id).await {
            if let Err(release) = self.store.set_remove(&keys::all_buckets(), name).await {
                warn!(bucket = name, error = %release, "could not release bucket claim");
            }
            return Err(err);
        }

        debug!(bucket = name, account = account_id, "bucket recorded");
        Ok(BucketCreation::Created)
    }

    async fn record_bucket(&self, name: &str, account_id: &str) -> CatalogResult<()> {
        self.store.set(&keys::bucket_owner(name), account_id).await?;
        self.store
            .set(&keys::bucket_creation_date(name), &Utc::now().to_rfc3339())
            .await?;
        self.store
            .set_add(&keys::account_buckets(account_id), name)
            .await?;
        Ok(())
    }

    pub async fn is_owner(&self, bucket: &str, account_id: &str) -> CatalogResult<bool> {
        Ok(self
            .store
            .set_is_member(&keys::account_buckets(account_id), bucket)
            .await?)
    }

    /// Whether any account has created `bucket`.
    pub async fn exists(&self, bucket: &str) -> CatalogResult<bool> {
        Ok(self.store.set_is_member(&keys::all_buckets(), bucket).await?)
    }

    pub async fn can_read(&self, bucket: &str, account_id: &str) -> CatalogResult<bool> {
        self.is_owner(bucket, account_id).await
    }

    pub async fn can_write(&self, bucket: &str, account_id: &str) -> CatalogResult<bool> {
        self.is_owner(bucket, account_id).await
    }

    /// Buckets owned by `account_id`, sorted by name.
    pub async fn list_buckets(&self, account_id: &str) -> CatalogResult<Vec<Bucket>> {
        let names = self
            .store
            .set_members(&keys::account_buckets(account_id))
            .await?;
        let mut buckets = Vec::with_capacity(names.len());
        for name in names {
            let creation_date = self.creation_date(&name).await?;
            buckets.push(Bucket {
                name,
                creation_date,
            });
        }
        Ok(buckets)
    }

    async fn creation_date(&self, bucket: &str) -> CatalogResult<DateTime<Utc>> {
        let key = keys::bucket_creation_date(bucket);
        let raw = self.store.get(&key).await?.ok_or_else(|| StoreError::Corrupt {
            key: key.clone(),
            reason: "missing creation date".into(),
        })?;
        let parsed = DateTime::parse_from_rfc3339(&raw).map_err(|err| StoreError::Corrupt {
            key,
            reason: err.to_string(),
        })?;
        Ok(parsed.with_timezone(&Utc))
    }

    pub async fn list_keys(&self, bucket: &str) -> CatalogResult<BTreeSet<String>> {
        Ok(self.store.set_members(&keys::bucket_keys(bucket)).await?)
    }

    /// Every key of `bucket` with its record, sorted by key.
    ///
    /// A key whose record is missing is in the middle of a put or delete and
    /// is left out.
    pub async fn list_key_records(&self, bucket: &str) -> CatalogResult<Vec<ObjectEntry>> {
        let names = self.list_keys(bucket).await?;
        let mut entries = Vec::with_capacity(names.len());
        for key in names {
            match self.key_record(bucket, &key).await? {
                Some(record) => entries.push(ObjectEntry { key, record }),
                None => debug!(bucket, key = key.as_str(), "skipping key without record"),
            }
        }
        Ok(entries)
    }

    pub async fn key_exists(&self, bucket: &str, key: &str) -> CatalogResult<bool> {
        Ok(self
            .store
            .set_is_member(&keys::bucket_keys(bucket), key)
            .await?)
    }

    pub async fn key_record(&self, bucket: &str, key: &str) -> CatalogResult<Option<KeyRecord>> {
        let store_key = keys::key_record(bucket, key);
        let Some(raw) = self.store.get(&store_key).await? else {
            return Ok(None);
        };
        let record = serde_json::from_str(&raw).map_err(|err| StoreError::Corrupt {
            key: store_key,
            reason: err.to_string(),
        })?;
        Ok(Some(record))
    }

    /// Object ids currently associated with `key`.
    pub async fn key_objects(&self, bucket: &str, key: &str) -> CatalogResult<BTreeSet<ObjectId>> {
        let store_key = keys::key_objects(bucket, key);
        let members = self.store.set_members(&store_key).await?;
        members
            .into_iter()
            .map(|raw| {
                ObjectId::try_from(raw).map_err(|err| {
                    CatalogError::from(StoreError::Corrupt {
                        key: store_key.clone(),
                        reason: err.to_string(),
                    })
                })
            })
            .collect()
    }

    /// Bind `record.object_id` to `key`.
    ///
    /// Call only once the blob backend has confirmed the write. The record is
    /// written first, then the object association, then the bucket's key set.
    pub async fn put_key(
        &self,
        bucket: &str,
        key: &str,
        account_id: &str,
        record: &KeyRecord,
    ) -> CatalogResult<()> {
        if !self.can_write(bucket, account_id).await? {
            return Err(CatalogError::AccessDenied(bucket.to_string()));
        }

        let encoded = serde_json::to_string(record).map_err(|err| StoreError::Corrupt {
            key: keys::key_record(bucket, key),
            reason: err.to_string(),
        })?;
        self.store.set(&keys::key_record(bucket, key), &encoded).await?;
        self.store
            .set_add(&keys::key_objects(bucket, key), record.object_id.as_str())
            .await?;
        self.store.set_add(&keys::bucket_keys(bucket), key).await?;
        Ok(())
    }

    /// Drop one object association after the backend confirmed its deletion.
    pub async fn delete_key_object(
        &self,
        bucket: &str,
        key: &str,
        object_id: &ObjectId,
    ) -> CatalogResult<bool> {
        Ok(self
            .store
            .set_remove(&keys::key_objects(bucket, key), object_id.as_str())
            .await?)
    }

    /// Remove `key` from `bucket` together with its record and associations.
    ///
    /// Call only once every associated object is gone from the backend.
    pub async fn delete_key(&self, bucket: &str, key: &str, account_id: &str) -> CatalogResult<()> {
        if !self.is_owner(bucket, account_id).await? {
            return Err(CatalogError::AccessDenied(bucket.to_string()));
        }
        if !self.store.set_remove(&keys::bucket_keys(bucket), key).await? {
            return Err(CatalogError::NoSuchKey {
                bucket: bucket.to_string(),
                key: key.to_string(),
            });
        }
        self.store.delete(&keys::key_record(bucket, key)).await?;
        self.store.delete(&keys::key_objects(bucket, key)).await?;
        Ok(())
    }

    pub async fn is_bucket_empty(&self, bucket: &str) -> CatalogResult<bool> {
        Ok(self.list_keys(bucket).await?.is_empty())
    }

    /// Delete an empty bucket owned by `account_id`.
    ///
    /// Returns `false` without touching anything when the caller is not the
    /// owner or the bucket still holds keys.
    pub async fn delete_bucket(&self, bucket: &str, account_id: &str) -> CatalogResult<bool> {
        if !self.is_owner(bucket, account_id).await? || !self.is_bucket_empty(bucket).await? {
            return Ok(false);
        }

        self.store
            .set_remove(&keys::account_buckets(account_id), bucket)
            .await?;
        self.store.set_remove(&keys::all_buckets(), bucket).await?;
        self.store.delete(&keys::bucket_owner(bucket)).await?;
        self.store.delete(&keys::bucket_creation_date(bucket)).await?;
        self.store.delete(&keys::bucket_keys(bucket)).await?;
        debug!(bucket, account = account_id, "bucket removed");
        Ok(true)
    }
}
