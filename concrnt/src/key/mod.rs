//! Subkey graphs: enactment, revocation and document validation

mod repository;
mod service;

pub use repository::{KeyRecord, KeyRepository, KEY_COLLECTION};
pub use service::{is_valid_at, KeyService};
