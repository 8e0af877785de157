//! HTTP API for sessions.

pub mod error;
pub mod sessions;

pub use error::{ApiError, ApiResult, ErrorResponse};
