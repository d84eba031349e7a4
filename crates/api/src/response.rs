//! Response envelope shared by API handlers.

use serde::Serialize;

/// `{ "data": T }` envelope for successful responses.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}
