//! Subscriptions - client-curated timeline collections

mod repository;
mod service;

pub use repository::{SubscriptionRecord, SubscriptionRepository, SUBSCRIPTION_COLLECTION};
pub use service::SubscriptionService;
