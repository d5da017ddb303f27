//! Shared application state, threaded into every route module via axum's
//! `State` extractor.

use std::sync::Arc;

use flowline_core::{CatalogClient, EventDispatcher, Renderer, RetryController};

use crate::config::ApiConfig;
use crate::store::AnyStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<AnyStore>,
    pub catalog: Arc<dyn CatalogClient>,
    pub renderer: Arc<Renderer>,
    pub dispatcher: Arc<EventDispatcher<AnyStore>>,
    pub retry: Arc<RetryController>,
    pub config: Arc<ApiConfig>,
}

#[cfg(test)]
pub(crate) fn test_state() -> AppState {
    use flowline_core::InMemoryCatalog;

    let store = Arc::new(AnyStore::Memory(flowline_core::InMemoryStore::new()));
    let catalog: Arc<dyn CatalogClient> = Arc::new(InMemoryCatalog::new());
    let renderer = Arc::new(Renderer::new());
    let retry = Arc::new(RetryController::new(renderer.clone()));
    let dispatcher = Arc::new(EventDispatcher::new(store.clone(), catalog.clone(), renderer.clone()));

    AppState {
        store,
        catalog,
        renderer,
        dispatcher,
        retry,
        config: Arc::new(ApiConfig::default()),
    }
}
