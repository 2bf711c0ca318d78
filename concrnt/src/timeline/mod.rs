//! Timeline storage, chunked cache and realtime fan-out

mod repository;
mod service;

pub use repository::{
    TimelineItemRecord, TimelineRecord, TimelineRepository, TIMELINE_COLLECTION,
    TIMELINE_ITEM_COLLECTION,
};
pub use service::TimelineService;
