pub mod repository;
pub mod service;
pub mod types;

pub use repository::{draft_key, DraftRepository};
pub use service::{AutosaveHandle, DraftOptions, FormDraft, DEFAULT_SAVE_INTERVAL};
pub use types::{is_structurally_empty, SavedFormData, CURRENT_VERSION};
