//! SAML 2.0 Web Browser SSO routes.
//!
//! - `/` - Starts an SP-initiated login and redirects to the IdP
//! - `/saml/metadata` - SP metadata document for the IdP
//! - `/saml/acs` - Assertion Consumer Service (HTTP-POST binding)

use std::collections::HashMap;

use axum::{
    Form, Json,
    extract::State,
    http::header,
    response::{IntoResponse, Redirect, Response},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite, time::Duration as CookieDuration},
};
use uuid::Uuid;

use super::AppState;
use crate::auth::{
    IdentityRecord, Provider, ProviderSession, SAML_RESPONSE_PARAM, SamlError, Session,
};

/// Media type of SAML metadata documents.
pub const SAML_METADATA_CONTENT_TYPE: &str = "application/samlmetadata+xml";

/// How long a login may take between the redirect and the IdP's POST.
const SESSION_COOKIE_MAX_AGE_MINUTES: i64 = 10;

/// Form data from the IdP (HTTP-POST binding).
#[derive(Debug, Deserialize)]
pub struct AcsForm {
    /// Base64-encoded SAML Response
    #[serde(rename = "SAMLResponse")]
    pub saml_response: String,
    /// RelayState sent with the AuthnRequest, or chosen by the IdP for unsolicited responses
    #[serde(rename = "RelayState", default)]
    pub relay_state: Option<String>,
}

/// Login endpoint - builds an AuthnRequest and redirects to the IdP.
///
/// The marshalled session is kept in a cookie until the IdP posts back.
#[tracing::instrument(name = "saml.login", skip(state, cookies))]
pub async fn login(State(state): State<AppState>, cookies: Cookies) -> Result<Redirect, SamlError> {
    let relay_state = Uuid::new_v4().to_string();
    let session = state.provider.begin_auth(&relay_state).await?;
    let auth_url = ProviderSession::get_auth_url(&session, state.provider.as_ref()).await?;

    let encoded = URL_SAFE_NO_PAD.encode(ProviderSession::marshal(&session)?);
    cookies.add(session_cookie(&state, encoded));

    tracing::info!(
        request_id = session.request_id().unwrap_or_default(),
        "Initiating SAML SSO login"
    );
    Ok(Redirect::to(&auth_url))
}

/// SP metadata, generated once at startup.
#[tracing::instrument(name = "saml.metadata", skip(state))]
pub async fn metadata(State(state): State<AppState>) -> Response {
    (
        [(header::CONTENT_TYPE, SAML_METADATA_CONTENT_TYPE)],
        state.metadata.clone(),
    )
        .into_response()
}

/// Assertion Consumer Service endpoint.
///
/// Validates the posted Response against the login session from the cookie,
/// or against a fresh unsolicited session when there is none, and returns
/// the mapped identity.
#[tracing::instrument(name = "saml.acs", skip(state, cookies, form))]
pub async fn acs(
    State(state): State<AppState>,
    cookies: Cookies,
    Form(form): Form<AcsForm>,
) -> Result<Json<IdentityRecord>, SamlError> {
    let mut session = match cookies.get(&state.session_cookie_name) {
        Some(cookie) => {
            // Single use, whatever the outcome
            cookies.remove(removal_cookie(&state));
            decode_session(&state, cookie.value())?
        }
        None => state.provider.unsolicited_session(),
    };

    let relay_state = form.relay_state.filter(|value| !value.is_empty());
    if session.request_id().is_some() && session.relay_state() != relay_state.as_deref() {
        return Err(SamlError::InvalidResponse(
            "RelayState does not match the login session".to_string(),
        ));
    }

    let mut params = HashMap::from([(SAML_RESPONSE_PARAM.to_string(), form.saml_response)]);
    if let Some(relay_state) = relay_state {
        params.insert("RelayState".to_string(), relay_state);
    }

    ProviderSession::authorize(&mut session, state.provider.as_ref(), &params).await?;
    let user = state.provider.fetch_user(session).await?;

    tracing::info!(
        provider = %user.provider,
        attributes = user.raw_data.len(),
        "SAML login completed"
    );
    Ok(Json(user))
}

fn decode_session(state: &AppState, value: &str) -> Result<Session, SamlError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| SamlError::Session(format!("invalid session cookie encoding: {e}")))?;
    let data = String::from_utf8(bytes)
        .map_err(|_| SamlError::Session("session cookie is not UTF-8".to_string()))?;
    state.provider.unmarshal_session(&data)
}

fn same_site(state: &AppState) -> SameSite {
    // The IdP posts cross-site; only SameSite=None cookies travel with it,
    // and browsers require Secure for those.
    if state.secure_cookies {
        SameSite::None
    } else {
        SameSite::Lax
    }
}

fn session_cookie(state: &AppState, value: String) -> Cookie<'static> {
    Cookie::build((state.session_cookie_name.clone(), value))
        .path("/")
        .http_only(true)
        .secure(state.secure_cookies)
        .same_site(same_site(state))
        .max_age(CookieDuration::minutes(SESSION_COOKIE_MAX_AGE_MINUTES))
        .build()
}

fn removal_cookie(state: &AppState) -> Cookie<'static> {
    Cookie::build(state.session_cookie_name.clone())
        .path("/")
        .http_only(true)
        .secure(state.secure_cookies)
        .same_site(same_site(state))
        .max_age(CookieDuration::ZERO)
        .build()
}
