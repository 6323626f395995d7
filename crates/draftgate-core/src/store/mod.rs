pub mod checkpoint_store;
pub mod session_store;

pub use checkpoint_store::{CheckpointStore, InMemoryCheckpointStore, SqliteCheckpointStore};
pub use session_store::SessionStore;
