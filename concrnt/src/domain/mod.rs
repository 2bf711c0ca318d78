//! Peer domain registry

mod repository;
mod service;

pub use repository::{DomainRecord, DomainRepository, DOMAIN_COLLECTION};
pub use service::DomainService;
