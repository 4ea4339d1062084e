use axum::{extract::State, Json};
use serde::Serialize;

use super::state::AppState;

/// Response structure for app information
#[derive(Debug, Serialize)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
    pub collections: Vec<String>,
}

/// GET /api/app-info
///
/// Returns application version and the names of the registered collections
pub async fn get_app_info(State(state): State<AppState>) -> Json<AppInfo> {
    Json(AppInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        collections: state.collection_names(),
    })
}
