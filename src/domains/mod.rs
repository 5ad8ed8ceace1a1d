pub mod core;
pub mod draft;
pub mod mutation;
pub mod sync;
pub mod upload;
