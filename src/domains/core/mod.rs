pub mod cache;
pub mod connectivity;
pub mod events;
pub mod remote_call;
pub mod store;

#[cfg(test)]
pub mod test_support;

// Re-export the traits and shared handles
pub use cache::{QueryCache, MemoryQueryCache};
pub use connectivity::ConnectivitySignal;
pub use events::{SyncEvent, SyncEventBus};
pub use remote_call::{CancelHandle, RemoteCallGuard};
pub use store::{PersistentStore, SqlitePersistentStore, MemoryPersistentStore, load_json, save_json};
