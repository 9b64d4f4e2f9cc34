//! Object storage for render inputs and artifacts.
//!
//! This crate provides:
//! - The [`ObjectStore`] trait the worker stages from and publishes to
//! - An S3-compatible client (Cloudflare R2)
//! - A local filesystem store for single-node deployments
//! - The deterministic artifact key layout

pub mod client;
pub mod error;
pub mod local;
pub mod store;

pub use client::{R2Client, R2Config};
pub use error::{StorageError, StorageResult};
pub use local::LocalObjectStore;
pub use store::{
    render_output_key, validate_key, ObjectStore, StorageConfig, RENDER_CONTENT_TYPE,
};
