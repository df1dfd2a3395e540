//! Two-tier key/value storage for snapshots.
//!
//! This module provides the durable tier (SQLite via tokio-rusqlite), the
//! in-process tier, and [`TieredStore`], the single read/write façade over
//! both:
//!
//! - Write-through: disk first, memory once the disk acknowledges
//! - Read-through: memory first, disk on a miss, memory populated on the way back
//! - Automatic schema migrations and WAL mode for the durable tier

pub mod durable;
pub mod memory;
pub mod migrations;
pub mod tiered;

pub use durable::{DB_FILE_NAME, DurableStore, SqliteStore};
pub use memory::MemoryTier;
pub use tiered::TieredStore;
