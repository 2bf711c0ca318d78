//! Messages - the primary content-addressed resource

mod repository;
mod service;

pub use repository::{MessageRecord, MessageRepository, MESSAGE_COLLECTION};
pub use service::MessageService;
