//! Entities, repositories and the datastore writes flow through.

mod change;
mod datastore;
mod entity;
mod memory;
mod repository;
mod session;
mod transaction;

pub use change::{Change, coalesce};
pub use datastore::Datastore;
pub use entity::{EntityMetadata, JsonEntity};
pub use memory::{MemoryRepository, Permission};
pub use repository::{EntityStore, Repository};
pub use session::Session;
pub use transaction::Transaction;
