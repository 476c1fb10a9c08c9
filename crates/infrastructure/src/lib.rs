//! Storage backends and the reference persistence engine.

#![forbid(unsafe_code)]

mod in_memory_backend;
mod postgres_backend;
mod storage_backend;
mod workspace;

pub use in_memory_backend::InMemoryBackend;
pub use postgres_backend::PostgresBackend;
pub use storage_backend::{EntityUpsert, StorageBackend, WriteBatch};
pub use workspace::Workspace;
