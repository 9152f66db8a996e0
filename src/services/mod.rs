pub mod blob_client;
pub mod catalog;
pub mod gateway_service;
pub mod metadata_store;
