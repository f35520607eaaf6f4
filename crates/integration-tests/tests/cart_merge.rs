//! Guest cart merge after login.

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use atelier_client::AtelierClient;
use atelier_client::cart::MergeState;
use atelier_client::config::{CartTimings, ClientConfig};
use atelier_core::{CurrencyCode, Price, ProductId, ProductSnapshot, Size, UserRole};
use atelier_integration_tests::FakeApi;
use rust_decimal::Decimal;
use secrecy::SecretString;

fn product(id: &str) -> ProductSnapshot {
    ProductSnapshot {
        id: ProductId::new(id),
        name: format!("Product {id}"),
        price: Price::new(Decimal::new(4200, 2), CurrencyCode::USD),
        image: None,
    }
}

async fn client(api: &FakeApi, dir: &tempfile::TempDir) -> AtelierClient {
    let config = ClientConfig {
        state_dir: dir.path().to_path_buf(),
        cookie_confirm_delay: Duration::from_millis(1),
        cart: CartTimings {
            merge_delay: Duration::from_millis(10),
            merge_busy_delay: Duration::from_millis(30),
            fetch_debounce: Duration::from_millis(20),
        },
        ..ClientConfig::default_for(api.url())
    };
    let client = AtelierClient::from_config(&config).unwrap();
    client.start().await;
    client
}

#[tokio::test]
async fn test_guest_cart_is_merged_once_after_login() {
    let api = FakeApi::spawn().await;
    api.seed_account("a@x.com", "pw", UserRole::User);
    let dir = tempfile::tempdir().unwrap();
    let client = client(&api, &dir).await;

    let cart = client.cart();
    cart.add_item(product("p1"), Some(Size::new("M")), 2).await.unwrap();
    cart.add_item(product("p2"), None, 1).await.unwrap();
    assert_eq!(client.persistor().guest_cart().total_items(), 3);

    client
        .session()
        .login("a@x.com", &SecretString::from("pw".to_string()))
        .await
        .unwrap();
    assert!(cart.wait_settled(Duration::from_secs(5)).await);

    assert_eq!(api.merge_calls(), 1);
    assert_eq!(api.cart_quantity("a@x.com", "p1", Some("M")), 2);
    assert_eq!(api.cart_quantity("a@x.com", "p2", None), 1);
    assert!(client.persistor().guest_cart().is_empty());
    assert_eq!(cart.server_cart().unwrap().total_items(), 3);

    // A refresh does not re-trigger the merge.
    client.session().refresh_access_token().await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(api.merge_calls(), 1);

    client.shutdown();
}

#[tokio::test]
async fn test_failed_merge_keeps_guest_items() {
    let api = FakeApi::spawn().await;
    api.seed_account("a@x.com", "pw", UserRole::User);
    api.fail_merge(true);
    let dir = tempfile::tempdir().unwrap();
    let client = client(&api, &dir).await;

    client.cart().add_item(product("p1"), None, 1).await.unwrap();
    client
        .session()
        .login("a@x.com", &SecretString::from("pw".to_string()))
        .await
        .unwrap();
    assert!(client.cart().wait_settled(Duration::from_secs(5)).await);

    assert_eq!(client.cart().state(), MergeState::Done);
    assert!(client.session().session().is_authenticated());
    assert_eq!(client.persistor().guest_cart().total_items(), 1);
    assert_eq!(api.cart_quantity("a@x.com", "p1", None), 0);

    client.shutdown();
}

#[tokio::test]
async fn test_logged_in_add_goes_to_server_cart() {
    let api = FakeApi::spawn().await;
    api.seed_account("a@x.com", "pw", UserRole::User);
    let dir = tempfile::tempdir().unwrap();
    let client = client(&api, &dir).await;

    client
        .session()
        .login("a@x.com", &SecretString::from("pw".to_string()))
        .await
        .unwrap();
    assert!(client.cart().wait_settled(Duration::from_secs(5)).await);

    let total = client.cart().add_item(product("p9"), None, 4).await.unwrap();
    assert_eq!(total, 4);
    assert_eq!(api.cart_quantity("a@x.com", "p9", None), 4);
    assert!(client.persistor().guest_cart().is_empty());

    client.shutdown();
}
