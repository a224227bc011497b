//! Persistence for the monitor registry, probe results and rollups
//!
//! Everything the scheduler, the evaluator and the rollup actor need from a
//! database goes through the [`MonitorRepository`] trait, so the rest of the
//! crate never knows which backend it talks to.
//!
//! ## Backends
//!
//! - **SQLite** (`storage-sqlite` feature, default): embedded database with
//!   WAL mode and embedded migrations
//! - **In-Memory**: no persistence, used by the agent and by tests
//!
//! ## Usage
//!
//! ```no_run
//! use service_sentinel::storage::{MonitorRepository, sqlite::SqliteRepository};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let repository = SqliteRepository::new("./sentinel.db").await?;
//!     let monitors = repository.list_enabled_monitors().await?;
//!     println!("{} monitors enabled", monitors.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

pub use backend::{HealthStatus, MonitorRepository, ResultQuery};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryRepository;
