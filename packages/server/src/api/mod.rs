//! The tool-call surface: JSON-over-HTTP, one route per operation.

pub mod error;
pub mod routes;
pub mod types;

pub use error::{ApiError, ApiResult};
