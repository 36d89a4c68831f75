//! Shared request state

use flock_core::store::Store;
use flock_core::TimelineService;

/// Server state shared across requests
pub struct AppState<S> {
    pub service: TimelineService<S>,

    /// Posts per page on `GET /timelines`
    pub page_size: u32,
}

impl<S: Store> AppState<S> {
    pub fn new(service: TimelineService<S>, page_size: u32) -> Self {
        Self { service, page_size }
    }
}
