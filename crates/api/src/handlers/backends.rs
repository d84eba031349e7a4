use axum::extract::State;
use axum::Json;
use relay_core::scheduling::BackendSnapshot;

use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/backends
///
/// Current reachability and queue depth of every backend, in
/// configuration order.
pub async fn list_backends(State(state): State<AppState>) -> Json<DataResponse<Vec<BackendSnapshot>>> {
    Json(DataResponse {
        data: state.dispatcher.backends(),
    })
}
