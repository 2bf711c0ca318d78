//! Associations - typed reactions attached to other resources

mod repository;
mod service;

pub use repository::{AssociationRecord, AssociationRepository, ASSOCIATION_COLLECTION};
pub use service::AssociationService;
