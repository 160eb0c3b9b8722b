use crate::hub::Hub;
use crate::realtime::RealtimeFetcher;
use crate::static_data::IndexStore;
use std::sync::Arc;

/// Everything a request handler can reach. Static indices are read-only
/// snapshots; realtime data is fetched per request.
pub struct AppState {
    pub store: Arc<IndexStore>,
    pub fetcher: RealtimeFetcher,
    pub hub: Arc<Hub>,
}

impl AppState {
    pub fn new(store: Arc<IndexStore>, fetcher: RealtimeFetcher, hub: Arc<Hub>) -> Self {
        Self {
            store,
            fetcher,
            hub,
        }
    }
}
