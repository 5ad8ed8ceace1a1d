// Public modules
pub mod config;
pub mod domains;
pub mod errors;
pub mod ffi;
pub mod globals;

// Private modules
mod db_migration;

use config::SyncConfig;

// Entry point for initialization
/// Open the store at `db_url`, recover interrupted work and start the sync worker.
/// Must be called before any other function in the library. Repeated calls are no-ops.
pub async fn initialize(db_url: &str, config: SyncConfig, online: bool) -> ffi::FFIResult<()> {
    globals::initialize(db_url, config, online).await
}

/// Feed a connectivity change. Returns whether the state changed.
pub fn set_online(online: bool) -> ffi::FFIResult<bool> {
    globals::set_online(online)
}

/// Last known connectivity. `false` before initialization.
pub fn is_online() -> bool {
    globals::is_online()
}
