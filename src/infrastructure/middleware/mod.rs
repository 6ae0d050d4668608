// HTTP middleware shared by both services

pub mod auth;
pub mod request_id;

pub use auth::require_bearer;
pub use request_id::{current_request_id, request_id_middleware, REQUEST_ID_HEADER};
