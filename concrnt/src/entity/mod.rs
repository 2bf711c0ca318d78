//! User entities and their affiliation lifecycle

mod repository;
mod service;

pub use repository::{EntityRecord, EntityRepository, ENTITY_COLLECTION};
pub use service::EntityService;
