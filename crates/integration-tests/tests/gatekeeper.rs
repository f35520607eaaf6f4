//! Storefront gatekeeper driven by cookies the client mirrors.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use atelier_client::AtelierClient;
use atelier_client::config::ClientConfig;
use atelier_core::UserRole;
use atelier_integration_tests::{FakeApi, spawn_storefront};
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use secrecy::SecretString;

struct Fixture {
    api: FakeApi,
    client: AtelierClient,
    edge: reqwest::Client,
    base: String,
    _state: tempfile::TempDir,
    _pages: tempfile::TempDir,
}

async fn fixture() -> Fixture {
    let api = FakeApi::spawn().await;
    api.seed_account("admin@x.com", "pw", UserRole::Admin);
    api.seed_account("user@x.com", "pw", UserRole::User);

    let pages = tempfile::tempdir().unwrap();
    for page in ["index.html", "login/index.html", "admin/index.html", "profile/index.html"] {
        let path = pages.path().join(page);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!("<h1>{page}</h1>")).unwrap();
    }
    let (addr, _server) = spawn_storefront(pages.path()).await;

    let state = tempfile::tempdir().unwrap();
    let config = ClientConfig {
        state_dir: state.path().to_path_buf(),
        cookie_confirm_delay: Duration::from_millis(1),
        ..ClientConfig::default_for(api.url())
    };
    let client = AtelierClient::from_config(&config).unwrap();
    client.start().await;
    let edge = client.edge_client().unwrap();

    Fixture {
        api,
        client,
        edge,
        base: format!("http://{addr}"),
        _state: state,
        _pages: pages,
    }
}

impl Fixture {
    async fn login(&self, email: &str) {
        self.client
            .session()
            .login(email, &SecretString::from("pw".to_string()))
            .await
            .unwrap();
    }

    async fn get(&self, path: &str) -> reqwest::Response {
        self.edge
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap()
    }
}

fn location(response: &reqwest::Response) -> &str {
    response.headers().get(LOCATION).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn test_anonymous_visitor_is_sent_to_login() {
    let fx = fixture().await;

    let response = fx.get("/profile/").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/login?redirect=%2Fprofile%2F");

    let response = fx.get("/api/orders").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = fx.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_admin_reaches_admin_pages() {
    let fx = fixture().await;
    fx.login("admin@x.com").await;

    let response = fx.get("/admin/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.text().await.unwrap().contains("admin/index.html"));

    fx.client.shutdown();
}

#[tokio::test]
async fn test_regular_user_is_denied_admin() {
    let fx = fixture().await;
    fx.login("user@x.com").await;

    let response = fx.get("/admin/products").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/?error=access-denied");

    let response = fx.get("/api/admin/users").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = fx.get("/profile/").await;
    assert_eq!(response.status(), StatusCode::OK);

    fx.client.shutdown();
}

#[tokio::test]
async fn test_signed_in_visitor_skips_login_page() {
    let fx = fixture().await;
    fx.login("user@x.com").await;

    let response = fx.get("/login").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), "/");

    fx.client.session().logout().await;
    let response = fx.get("/login/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(fx.api.logout_calls(), 1);

    fx.client.shutdown();
}
