//! Coordination store adapters for the render scheduler.
//!
//! This crate provides:
//! - [`AdmissionStore`]: bounded concurrency leases with TTL expiry
//! - [`JobQueue`]: FIFO of pending job ids with atomic pop
//! - [`JobStore`]: job records with compare-and-set status transitions
//! - [`RenderSubmitter`]: submit, status and cancel for callers
//!
//! Each trait has a Redis implementation for multi-worker deployments and an
//! in-process one for single-node use and tests.

pub mod admission;
pub mod config;
pub mod error;
pub mod queue;
pub mod store;
pub mod submitter;

pub use admission::{AdmissionStore, LeaseToken, MemoryAdmissionStore, RedisAdmissionStore};
pub use config::{AdmissionConfig, Keys, RedisHandle, StoreConfig};
pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, MemoryJobQueue, RedisJobQueue};
pub use store::{JobStore, MemoryJobStore, RedisJobStore};
pub use submitter::RenderSubmitter;
