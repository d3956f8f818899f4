//! SAML 2.0 Web Browser SSO, Service Provider side.
//!
//! [`auth::SamlProvider`] sends users to the identity provider with an
//! AuthnRequest over the HTTP-Redirect binding, validates the signed Response
//! posted back to the Assertion Consumer Service, and maps the assertion's
//! attributes onto an [`auth::IdentityRecord`].
//!
//! The `server` feature adds configuration loading, logging setup and axum
//! routes for running the provider as a standalone service.

pub mod auth;
#[cfg(feature = "server")]
pub mod config;
#[cfg(feature = "server")]
pub mod observability;
#[cfg(feature = "server")]
pub mod routes;
pub mod xml;
