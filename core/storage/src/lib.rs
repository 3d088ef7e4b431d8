//! Durable key-value storage for the sync agent.
//!
//! This module provides a trait-based interface over the places the agent
//! can keep its state (a directory on disk, process memory) and a wrapper
//! that degrades to memory when the durable backend stops accepting writes.
//!
//! # Design Principles
//! - Per-key atomicity: a reader never observes a partially written value
//! - No cross-key transactions
//! - Async operations: all I/O goes through tokio

pub mod local;
pub mod memory;
pub mod resilient;
pub mod store;

pub use local::FileStore;
pub use memory::MemoryStore;
pub use resilient::ResilientStore;
pub use store::{validate_key, KeyValueStore};
