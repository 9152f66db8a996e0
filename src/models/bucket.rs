//! Represents a logical bucket: a named, owned container of keys.

use chrono::{DateTime, Utc};

/// A bucket as reported by `list_buckets`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    /// Bucket name (3–63 characters, see `catalog::validate_bucket_name`).
    pub name: String,

    /// When the bucket was created. Re-creating an owned bucket keeps it.
    pub creation_date: DateTime<Utc>,
}

/// Result of a create-bucket call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BucketCreation {
    /// The bucket did not exist and now belongs to the caller.
    Created,
    /// The caller already owned the bucket; nothing changed.
    AlreadyOwned,
}
