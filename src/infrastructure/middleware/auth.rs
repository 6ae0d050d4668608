// Bearer authentication layer. Every API route sits behind it; `/health`
// does not.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::debug;

use crate::infrastructure::security::JwtValidator;

/// Rejects the request with a 401 problem unless it carries a valid token.
/// On success the [`AuthenticatedUser`](crate::infrastructure::security::AuthenticatedUser)
/// is stored in the request extensions.
pub async fn require_bearer(
    State(validator): State<Arc<JwtValidator>>,
    mut request: Request,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match validator.validate_header(header) {
        Ok(user) => {
            debug!(subject = %user.subject, "Request authenticated");
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}
