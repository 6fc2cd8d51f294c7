//! Session middleware - binds each request to an operator session
//!
//! Reads the session cookie, resolves (or starts) the session and injects
//! `Arc<Session>` into request extensions. Only mutating requests start a
//! stored session; new sessions get a Set-Cookie.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, Method, Request},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::session::Session;
use crate::state::AppState;

pub type SessionHandle = Arc<Session>;

pub async fn with_session(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let cookie_name = &state.config.session.cookie_name;
    let id = extract_session_cookie(req.headers(), cookie_name)
        .and_then(|v| Uuid::parse_str(&v).ok());

    let create = !matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS);
    let (session, created) = state.sessions.resolve(id, create).await;
    req.extensions_mut().insert(session.clone());

    let mut response = next.run(req).await;

    if created {
        let max_age = state.config.session.idle_timeout_minutes * 60;
        match HeaderValue::from_str(&session_cookie(cookie_name, &session.id.to_string(), max_age)) {
            Ok(value) => {
                response.headers_mut().append(SET_COOKIE, value);
            }
            Err(e) => tracing::warn!("[Session] Could not set cookie: {}", e),
        }
    }
    response
}

/// Extract the session cookie value from the Cookie header
fn extract_session_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    headers
        .get_all("cookie")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|s| s.split(';'))
        .find_map(|cookie| cookie.trim().strip_prefix(prefix.as_str()).map(str::to_string))
}

pub fn session_cookie(name: &str, value: &str, max_age: u64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        name, value, max_age
    )
}
