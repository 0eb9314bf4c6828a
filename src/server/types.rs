//! HTTP request/response types
//!
//! JSON shapes for the inbound API, plus the error type handlers map
//! failures into.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::Post;
use crate::upstream::SearchQuery;

/// Error body: `{"error": "<message>"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// A handler failure with its HTTP status. Client mistakes are 400,
/// upstream or internal failures 502.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_GATEWAY,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
}

/// `GET /subreddit` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubredditResponse {
    pub posts: Vec<Post>,
    pub meta: SubredditMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubredditMeta {
    pub requested_limit: i64,
    pub actual_count: usize,
    pub subreddit: String,
    pub since_timestamp: i64,
    pub processing_time_ms: u64,
}

/// `GET /search` response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub posts: Vec<Post>,
    pub meta: SearchMeta,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMeta {
    /// The raw free-text query as received
    pub query: String,
    /// The resolved search parameters
    pub params: SearchQuery,
    pub count: usize,
    pub processing_time_ms: u64,
    /// Human-readable form of the requested limit
    pub requested_limit: String,
}
