use std::sync::Arc;

use tokio::sync::Mutex;

use crate::ProviderApi;

#[derive(Clone)]
pub(super) struct AppState {
    pub(super) inner: Arc<Mutex<ProviderApi>>,
}

impl AppState {
    pub(super) fn new(api: ProviderApi) -> Self {
        Self {
            inner: Arc::new(Mutex::new(api)),
        }
    }
}
