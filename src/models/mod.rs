//! Core data models for the gateway.
//!
//! These entities describe what the catalog keeps in the metadata store:
//! accounts own buckets, buckets contain keys, and every key points at an
//! object identifier handed out by the blob backend. Key records serialize
//! with `serde` so they can be stored as JSON values.

pub mod account;
pub mod bucket;
pub mod object;
