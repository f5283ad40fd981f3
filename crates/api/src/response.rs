//! Shared response envelope types for API handlers.
//!
//! Single resources and lists use a `{ "data": ... }` envelope; paginated
//! lists add the unpaged `total`.

use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// `{ "data": [..], "total": n, "limit": l, "offset": o }`.
#[derive(Debug, Serialize)]
pub struct PageResponse<T: Serialize> {
    pub data: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
