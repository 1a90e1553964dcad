// Web layer - the axum adapter in front of the core proxy service.

#[path = "responses.rs"]
pub mod responses;

#[path = "routes.rs"]
pub mod routes;

pub use routes::router;
