//! HTTP response wrappers and the RouteModule trait for organizing routes.

pub mod response;
pub mod routes;

pub use response::{ApiResponse, JsonResponse};
pub use routes::RouteModule;
