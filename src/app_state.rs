use std::sync::Arc;

use crate::services::{dispatcher::Dispatcher, poller::ResultPoller, queue::JobStore};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub poller: Arc<ResultPoller>,
    pub max_image_bytes: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, max_image_bytes: usize) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(store.clone())),
            poller: Arc::new(ResultPoller::new(store.clone())),
            store,
            max_image_bytes,
        }
    }
}
