//! Storage abstractions for persisted collection indexes.
//!
//! Provides a unified interface for durable, atomically replaced index
//! blobs on:
//! - process memory (tests, ephemeral collections)
//! - local disk
//! - S3/MinIO object storage

pub mod error;
pub mod object_store;

pub use self::object_store::{IndexStore, ObjectIndexStore, ObjectStorageConfig, StoreBackend};
pub use error::{StoreError, StoreResult};
