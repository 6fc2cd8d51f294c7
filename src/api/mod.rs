//! API module - HTTP handlers and routes

pub mod handlers;
pub mod session;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use crate::state::AppState;

pub fn routes(state: AppState) -> Router<AppState> {
    let session_routes = Router::new()
        // Provisioning wizard
        .route("/api/wireguard/state", get(handlers::get_state))
        .route("/api/wireguard/keypair", post(handlers::begin_peer))
        .route(
            "/api/wireguard/peers",
            get(handlers::list_peers).post(handlers::register_peer),
        )
        .route("/api/wireguard/defer", post(handlers::defer_artifact))
        .route("/api/wireguard/cancel", post(handlers::cancel))
        .route("/api/wireguard/interfaces", get(handlers::list_interfaces))
        // Artifacts
        .route(
            "/api/wireguard/peers/:public_key",
            delete(handlers::delete_peer),
        )
        .route(
            "/api/wireguard/peers/:public_key/artifact",
            post(handlers::render_artifact),
        )
        .route(
            "/api/wireguard/peers/:public_key/private-key",
            post(handlers::submit_manual_key),
        )
        .route(
            "/api/wireguard/peers/:public_key/config",
            post(handlers::download_config),
        )
        // Session
        .route("/api/session/endpoint", get(handlers::get_endpoint))
        .route("/api/session/end", post(handlers::end_session))
        .route_layer(middleware::from_fn_with_state(
            state,
            session::with_session,
        ));

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::health_check))
        .route("/api/wireguard/presets", get(handlers::list_presets))
        .merge(session_routes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::backend::testing::MockBackend;
    use crate::config::Config;
    use crate::state::Capabilities;

    fn app() -> (Router, AppState) {
        let backend = Arc::new(MockBackend::new());
        let state = AppState::new(
            Config::default(),
            Capabilities {
                keys: backend.clone(),
                registry: backend.clone(),
                remote: backend.clone(),
                directory: backend,
            },
        );
        (routes(state.clone()).with_state(state.clone()), state)
    }

    fn request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_cookieless_reads_do_not_start_sessions() {
        let (app, state) = app();

        for uri in ["/api/wireguard/peers", "/api/wireguard/state", "/api/session/endpoint"] {
            let response = app.clone().oneshot(request(Method::GET, uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
            assert!(response.headers().get(header::SET_COOKIE).is_none());
        }
        assert_eq!(state.sessions.len().await, 0);

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/api/wireguard/cancel"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.starts_with("wgp_session="));
        assert_eq!(state.sessions.len().await, 1);
    }

    #[tokio::test]
    async fn test_presets_listed_without_session() {
        let (app, state) = app();
        let response = app
            .oneshot(request(Method::GET, "/api/wireguard/presets"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(state.sessions.len().await, 0);
    }
}
