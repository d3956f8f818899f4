mod error;
pub mod saml;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use bytes::Bytes;
pub use error::{ErrorInfo, ErrorResponse};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::{auth::SamlProvider, config::ServerConfig};

/// Shared state for the route handlers.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<SamlProvider>,
    /// SP metadata document served at `/saml/metadata`.
    pub metadata: Bytes,
    pub session_cookie_name: String,
    /// Mark cookies `Secure`; required when the ACS is served over HTTPS.
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(
        provider: SamlProvider,
        metadata: Bytes,
        session_cookie_name: impl Into<String>,
        secure_cookies: bool,
    ) -> Self {
        Self {
            provider: Arc::new(provider),
            metadata,
            session_cookie_name: session_cookie_name.into(),
            secure_cookies,
        }
    }
}

/// Build the application router with its middleware stack.
pub fn build_app(server: &ServerConfig, state: AppState) -> Router {
    Router::new()
        .route("/", get(saml::login))
        .route("/saml/metadata", get(saml::metadata))
        .route("/saml/acs", post(saml::acs))
        .layer(tower_cookies::CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(server.body_limit_bytes))
        .with_state(state)
}
