use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use log::{debug, error, warn};
use serde::Serialize;
use serde_json::Value;

use super::state::AppState;
use crate::error::DataKitError;
use crate::query::schema::parse_request;
use crate::query::DataKitResult;

/// Error body for every failed collection request
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// POST /api/collections/{name}/fetch
///
/// Validates the JSON body as a fetch request and runs it against the named
/// collection.
pub async fn fetch_collection(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<DataKitResult<Value>>, ApiError> {
    let Json(body) = body.map_err(|rejection| {
        debug!("Rejected body for collection '{}': {}", name, rejection);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: rejection.body_text(),
            }),
        )
    })?;

    let action = state
        .collection(&name)
        .ok_or_else(|| error_response(DataKitError::CollectionNotFound(name.clone())))?;

    let request = parse_request(&body).map_err(error_response)?;

    match action.call(request).await {
        Ok(result) => {
            debug!(
                "Collection '{}' returned {} of {} documents",
                name,
                result.items().len(),
                result.document_total()
            );
            Ok(Json(result))
        }
        Err(e) => Err(error_response(e)),
    }
}

/// Maps an error onto its HTTP status: request faults are 400, unknown
/// collections 404, everything else 500.
pub fn error_response(err: DataKitError) -> ApiError {
    let status = match &err {
        DataKitError::CollectionNotFound(_) => StatusCode::NOT_FOUND,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        error!("Collection fetch failed: {}", err);
    } else {
        warn!("Collection fetch rejected: {}", err);
    }

    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}
