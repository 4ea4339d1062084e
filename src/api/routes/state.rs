use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::controller::FetchAction;

/// Shared application state passed to all Axum handlers via `.with_state()`.
///
/// Holds the registry of collections that can be fetched over HTTP. Each
/// collection is an action that takes a validated request and returns an
/// `ITEMS` envelope of JSON records.
#[derive(Clone, Default)]
pub struct AppState {
    collections: Arc<BTreeMap<String, Arc<dyn FetchAction<Value>>>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `action` under `name`, replacing any earlier registration
    pub fn with_collection(
        mut self,
        name: impl Into<String>,
        action: impl FetchAction<Value> + 'static,
    ) -> Self {
        Arc::make_mut(&mut self.collections).insert(name.into(), Arc::new(action));
        self
    }

    pub fn collection(&self, name: &str) -> Option<Arc<dyn FetchAction<Value>>> {
        self.collections.get(name).cloned()
    }

    pub fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }
}
