//! HTTP routes for storefront.
//!
//! Pages are prebuilt and served from the static directory. Everything,
//! including the static fallback, runs behind the gatekeeper.

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    routing::get,
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::middleware::gatekeeper_middleware;
use crate::state::AppState;

/// Build the storefront router.
pub fn router(state: AppState) -> Router {
    let pages = ServeDir::new(&state.config().static_dir).append_index_html_on_directories(true);

    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .fallback_service(pages)
        .layer(from_fn_with_state(state.clone(), gatekeeper_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Liveness health check endpoint.
///
/// Returns "ok" if the server is running. Does not check dependencies.
async fn health() -> &'static str {
    "ok"
}

/// Readiness health check endpoint.
///
/// Returns 503 Service Unavailable until the static directory exists.
async fn readiness(State(state): State<AppState>) -> StatusCode {
    match tokio::fs::metadata(&state.config().static_dir).await {
        Ok(meta) if meta.is_dir() => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, header};
    use tower::ServiceExt;

    use super::*;
    use crate::config::StorefrontConfig;

    fn app(static_dir: &std::path::Path) -> Router {
        let config = StorefrontConfig {
            static_dir: static_dir.to_path_buf(),
            ..StorefrontConfig::default()
        };
        router(AppState::new(config))
    }

    async fn get_path(app: Router, path: &str, cookie: Option<&str>) -> axum::response::Response {
        let mut request = Request::builder().uri(path);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let response = get_path(app(dir.path()), "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_path(app(dir.path()), "/health/ready", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let missing = dir.path().join("missing");
        let response = get_path(app(&missing), "/health/ready", None).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_static_pages_behind_gatekeeper() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        std::fs::write(dir.path().join("cart.html"), "<h1>cart</h1>").unwrap();

        let response = get_path(app(dir.path()), "/index.html", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_path(app(dir.path()), "/cart.html", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = get_path(app(dir.path()), "/cart", None).await;
        assert_eq!(response.status(), StatusCode::FOUND);

        let response = get_path(
            app(dir.path()),
            "/cart",
            Some("auth-token=access-token-0001; user-role=user"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_encoded_and_dotted_paths_do_not_bypass_gatekeeper() {
        let dir = tempfile::tempdir().unwrap();
        for page in ["admin/products/index.html", "cart/index.html"] {
            let path = dir.path().join(page);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "<h1>protected</h1>").unwrap();
        }
        let user = Some("auth-token=access-token-0001; user-role=user");

        for path in ["//admin/products/", "/%61dmin/products/", "/./admin/products/"] {
            let response = get_path(app(dir.path()), path, user).await;
            assert_eq!(response.status(), StatusCode::FOUND, "{path}");
            assert_eq!(
                response.headers().get(header::LOCATION).unwrap(),
                "/?error=access-denied",
                "{path}"
            );
        }

        for path in ["/./cart/", "/%63art/", "//cart/"] {
            let response = get_path(app(dir.path()), path, None).await;
            assert_eq!(response.status(), StatusCode::FOUND, "{path}");
            assert_eq!(
                response.headers().get(header::LOCATION).unwrap(),
                "/login?redirect=%2Fcart%2F",
                "{path}"
            );
        }

        let admin = Some("auth-token=access-token-0001; user-role=admin");
        let response = get_path(app(dir.path()), "/admin/products/", admin).await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
