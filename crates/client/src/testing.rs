//! Scripted in-memory `RemoteApi` for unit tests.

#![allow(clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use atelier_core::{CurrencyCode, Email, Price, ProductId, ProductSnapshot, User, UserId, UserRole};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};

use crate::api::{
    ApiError, CartItemInput, LoginPayload, RemoteApi, ServerCart, ServerCartLine, SignupRequest,
    TokenPair,
};
use crate::config::{CartTimings, ClientConfig};
use crate::persist::Persistor;
use crate::session::{CookieBackend, MemoryCookieJar};
use crate::AtelierClient;

pub fn product(id: &str) -> ProductSnapshot {
    ProductSnapshot {
        id: ProductId::new(id),
        name: format!("Product {id}"),
        price: Price::new(Decimal::new(2500, 2), CurrencyCode::USD),
        image: None,
    }
}

pub fn user(email: &str, role: UserRole) -> User {
    User {
        id: UserId::new(format!("user-{email}")),
        email: Email::parse(email).unwrap(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        role,
        created_at: chrono::Utc::now(),
    }
}

#[derive(Default)]
pub struct FakeApi {
    accounts: Mutex<HashMap<String, (String, User)>>,
    access: Mutex<HashMap<String, User>>,
    refresh: Mutex<HashMap<String, User>>,
    cart: Mutex<ServerCart>,
    issued: AtomicUsize,
    pub fail_refresh: AtomicBool,
    pub fail_merge: AtomicBool,
    pub unreachable: AtomicBool,
    pub merge_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub logout_calls: AtomicUsize,
    pub cart_fetches: AtomicUsize,
    pub latency: Duration,
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            latency: Duration::from_millis(5),
            ..Self::default()
        }
    }

    pub fn with_account(self, email: &str, password: &str, role: UserRole) -> Self {
        self.accounts.lock().unwrap().insert(
            email.to_string(),
            (password.to_string(), user(email, role)),
        );
        self
    }

    /// Issue a pair for `user` without going through login.
    pub fn issue(&self, user: &User) -> TokenPair {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let pair = TokenPair::new(format!("access-token-{n:04}"), format!("refresh-token-{n:04}"));
        self.access
            .lock()
            .unwrap()
            .insert(pair.access_token.clone(), user.clone());
        self.refresh
            .lock()
            .unwrap()
            .insert(pair.refresh_token.clone(), user.clone());
        pair
    }

    pub fn server_cart(&self) -> ServerCart {
        self.cart.lock().unwrap().clone()
    }

    async fn roundtrip(&self) -> Result<(), ApiError> {
        tokio::time::sleep(self.latency).await;
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ApiError::Network("connection refused".to_string()));
        }
        Ok(())
    }

    fn authorize(&self, token: &str) -> Result<User, ApiError> {
        self.access
            .lock()
            .unwrap()
            .get(token)
            .cloned()
            .ok_or_else(|| ApiError::Rejected {
                status: 401,
                message: "Invalid or expired token".to_string(),
                code: Some("unauthorized".to_string()),
            })
    }

    fn add_line(&self, item: &CartItemInput) {
        let mut cart = self.cart.lock().unwrap();
        if let Some(line) = cart
            .items
            .iter_mut()
            .find(|line| line.product.id == item.product_id && line.size == item.size)
        {
            line.quantity += item.quantity;
        } else {
            cart.items.push(ServerCartLine {
                product: product(item.product_id.as_str()),
                size: item.size.clone(),
                quantity: item.quantity,
            });
        }
    }
}

#[async_trait]
impl RemoteApi for FakeApi {
    async fn login(&self, email: &Email, password: &SecretString) -> Result<LoginPayload, ApiError> {
        self.roundtrip().await?;
        let account = self.accounts.lock().unwrap().get(email.as_str()).cloned();
        match account {
            Some((expected, user)) if expected == password.expose_secret() => {
                let tokens = self.issue(&user);
                Ok(LoginPayload { user, tokens })
            }
            _ => Err(ApiError::Rejected {
                status: 401,
                message: "Invalid email or password".to_string(),
                code: Some("invalid_credentials".to_string()),
            }),
        }
    }

    async fn signup(&self, request: &SignupRequest) -> Result<User, ApiError> {
        self.roundtrip().await?;
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.contains_key(request.email.as_str()) {
            return Err(ApiError::Rejected {
                status: 409,
                message: "Email already registered".to_string(),
                code: Some("email_taken".to_string()),
            });
        }
        let mut created = user(request.email.as_str(), UserRole::User);
        created.first_name.clone_from(&request.first_name);
        created.last_name.clone_from(&request.last_name);
        accounts.insert(
            request.email.as_str().to_string(),
            (request.password.expose_secret().to_string(), created.clone()),
        );
        Ok(created)
    }

    async fn me(&self, access_token: &str) -> Result<User, ApiError> {
        self.roundtrip().await?;
        self.authorize(access_token)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.roundtrip().await?;
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ApiError::Rejected {
                status: 401,
                message: "Invalid refresh token".to_string(),
                code: None,
            });
        }
        let user = self.refresh.lock().unwrap().remove(refresh_token);
        match user {
            Some(user) => Ok(self.issue(&user)),
            None => Err(ApiError::Rejected {
                status: 401,
                message: "Invalid refresh token".to_string(),
                code: None,
            }),
        }
    }

    async fn logout(&self, _access_token: Option<&str>) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        self.roundtrip().await
    }

    async fn get_cart(&self, access_token: &str) -> Result<ServerCart, ApiError> {
        self.cart_fetches.fetch_add(1, Ordering::SeqCst);
        self.roundtrip().await?;
        self.authorize(access_token)?;
        Ok(self.server_cart())
    }

    async fn merge_cart(
        &self,
        access_token: &str,
        items: &[CartItemInput],
    ) -> Result<ServerCart, ApiError> {
        self.roundtrip().await?;
        self.authorize(access_token)?;
        if self.fail_merge.load(Ordering::SeqCst) {
            return Err(ApiError::Status {
                status: 500,
                body: "merge unavailable".to_string(),
            });
        }
        self.merge_calls.fetch_add(1, Ordering::SeqCst);
        for item in items {
            self.add_line(item);
        }
        Ok(self.server_cart())
    }

    async fn add_to_cart(
        &self,
        access_token: &str,
        item: &CartItemInput,
    ) -> Result<ServerCart, ApiError> {
        self.roundtrip().await?;
        self.authorize(access_token)?;
        self.add_line(item);
        Ok(self.server_cart())
    }
}

/// Client config with short timings.
pub fn fast_config() -> ClientConfig {
    let mut config = ClientConfig::default_for(url::Url::parse("http://api.test/").unwrap());
    config.cookie_confirm_delay = Duration::from_millis(1);
    config.cart = CartTimings {
        merge_delay: Duration::from_millis(10),
        merge_busy_delay: Duration::from_millis(30),
        fetch_debounce: Duration::from_millis(20),
    };
    config
}

pub struct Harness {
    pub api: Arc<FakeApi>,
    pub jar: Arc<MemoryCookieJar>,
    pub persistor: Arc<Persistor>,
    pub client: AtelierClient,
}

/// Harness with a started client (hydrated, watchers running).
pub async fn started(api: FakeApi) -> Harness {
    let harness = harness(api);
    harness.client.start().await;
    harness
}

/// Started harness with custom timings.
pub async fn started_with(api: FakeApi, config: &ClientConfig) -> Harness {
    let harness = build(api, Arc::new(Persistor::in_memory()), config);
    harness.client.start().await;
    harness
}

pub fn harness(api: FakeApi) -> Harness {
    harness_with(api, Arc::new(Persistor::in_memory()))
}

pub fn harness_with(api: FakeApi, persistor: Arc<Persistor>) -> Harness {
    build(api, persistor, &fast_config())
}

fn build(api: FakeApi, persistor: Arc<Persistor>, config: &ClientConfig) -> Harness {
    let api = Arc::new(api);
    let jar = Arc::new(MemoryCookieJar::new());
    let cookies: Arc<dyn CookieBackend> = jar.clone();
    let client = AtelierClient::from_parts(api.clone(), Arc::clone(&persistor), cookies, config);
    Harness {
        api,
        jar,
        persistor,
        client,
    }
}
