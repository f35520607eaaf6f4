//! Integration test support for Atelier.
//!
//! Spins up, on ephemeral ports inside the test process:
//!
//! - [`FakeApi`] - an axum implementation of the remote REST API contract
//!   (auth, refresh, cart merge) with knobs for failure injection
//! - [`spawn_storefront`] - the real storefront router, gatekeeper included
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p atelier-integration-tests
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use atelier_core::{CurrencyCode, Email, Price, ProductId, ProductSnapshot, User, UserId, UserRole};
use atelier_storefront::config::StorefrontConfig;
use atelier_storefront::state::AppState;
use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

/// Account seeded into the fake API.
#[derive(Debug, Clone)]
struct Account {
    password: String,
    user: User,
}

/// A cart line as stored by the fake API.
#[derive(Debug, Clone)]
struct Line {
    product_id: ProductId,
    size: Option<String>,
    quantity: u32,
}

#[derive(Default)]
struct Backend {
    accounts: Mutex<HashMap<String, Account>>,
    access: Mutex<HashMap<String, String>>,
    refresh: Mutex<HashMap<String, String>>,
    carts: Mutex<HashMap<String, Vec<Line>>>,
    fail_refresh: AtomicBool,
    fail_merge: AtomicBool,
    merge_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a running fake API.
#[derive(Clone)]
pub struct FakeApi {
    backend: Arc<Backend>,
    addr: SocketAddr,
    task: Arc<JoinHandle<()>>,
}

impl FakeApi {
    /// Start the fake API on an ephemeral port.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot bind.
    pub async fn spawn() -> Self {
        let backend = Arc::new(Backend::default());
        let (addr, task) = serve(api_router(Arc::clone(&backend))).await;
        Self {
            backend,
            addr,
            task: Arc::new(task),
        }
    }

    /// Base URL for `ClientConfig::default_for`.
    ///
    /// # Panics
    ///
    /// Never in practice; the loopback address always forms a URL.
    #[must_use]
    pub fn url(&self) -> Url {
        #[allow(clippy::expect_used)]
        Url::parse(&format!("http://{}/api/", self.addr)).expect("valid loopback URL")
    }

    /// Register an account.
    pub fn seed_account(&self, email: &str, password: &str, role: UserRole) -> User {
        let user = new_user(email, "Ada", "Lovelace", role);
        lock(&self.backend.accounts).insert(
            user.email.as_str().to_string(),
            Account {
                password: password.to_string(),
                user: user.clone(),
            },
        );
        user
    }

    /// Fail every refresh from now on.
    pub fn fail_refresh(&self, fail: bool) {
        self.backend.fail_refresh.store(fail, Ordering::SeqCst);
    }

    /// Fail every merge from now on.
    pub fn fail_merge(&self, fail: bool) {
        self.backend.fail_merge.store(fail, Ordering::SeqCst);
    }

    /// Accepted merge calls.
    #[must_use]
    pub fn merge_calls(&self) -> usize {
        self.backend.merge_calls.load(Ordering::SeqCst)
    }

    /// Refresh calls received.
    #[must_use]
    pub fn refresh_calls(&self) -> usize {
        self.backend.refresh_calls.load(Ordering::SeqCst)
    }

    /// Logout calls received.
    #[must_use]
    pub fn logout_calls(&self) -> usize {
        self.backend.logout_calls.load(Ordering::SeqCst)
    }

    /// Server-side quantity for a product/size pair of `email`'s cart.
    #[must_use]
    pub fn cart_quantity(&self, email: &str, product_id: &str, size: Option<&str>) -> u32 {
        lock(&self.backend.carts)
            .get(email)
            .into_iter()
            .flatten()
            .filter(|line| line.product_id.as_str() == product_id && line.size.as_deref() == size)
            .map(|line| line.quantity)
            .sum()
    }

    /// Whether an access token is currently valid.
    #[must_use]
    pub fn is_valid_access_token(&self, token: &str) -> bool {
        lock(&self.backend.access).contains_key(token)
    }
}

impl Drop for FakeApi {
    fn drop(&mut self) {
        if Arc::strong_count(&self.task) == 1 {
            self.task.abort();
        }
    }
}

/// Start the storefront router serving `static_dir`.
pub async fn spawn_storefront(static_dir: &Path) -> (SocketAddr, JoinHandle<()>) {
    let config = StorefrontConfig {
        static_dir: static_dir.to_path_buf(),
        ..StorefrontConfig::default()
    };
    serve(atelier_storefront::routes::router(AppState::new(config))).await
}

async fn serve(app: Router) -> (SocketAddr, JoinHandle<()>) {
    #[allow(clippy::expect_used)]
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    #[allow(clippy::expect_used)]
    let addr = listener.local_addr().expect("local addr");
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, task)
}

// =============================================================================
// Fake API handlers
// =============================================================================

fn api_router(backend: Arc<Backend>) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/me", get(me))
        .route("/api/auth/refresh-token", post(refresh_token))
        .route("/api/auth/logout", post(logout))
        .route("/api/cart", get(get_cart))
        .route("/api/cart/merge", post(merge_cart))
        .route("/api/cart/add", post(add_to_cart))
        .with_state(backend)
}

fn new_user(email: &str, first_name: &str, last_name: &str, role: UserRole) -> User {
    #[allow(clippy::expect_used)]
    let email = Email::parse(email).expect("valid seed email");
    User {
        id: UserId::new(Uuid::new_v4().to_string()),
        email,
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        role,
        created_at: chrono::Utc::now(),
    }
}

fn product(id: &ProductId) -> ProductSnapshot {
    ProductSnapshot {
        id: id.clone(),
        name: format!("Product {id}"),
        price: Price::new(Decimal::new(2500, 2), CurrencyCode::USD),
        image: None,
    }
}

fn error(status: StatusCode, message: &str, code: Option<&str>) -> Response {
    (
        status,
        Json(json!({ "status": "error", "message": message, "code": code })),
    )
        .into_response()
}

fn success(data: Value) -> Response {
    Json(json!({ "status": "success", "data": data })).into_response()
}

fn unauthorized() -> Response {
    error(
        StatusCode::UNAUTHORIZED,
        "Invalid or expired token",
        Some("unauthorized"),
    )
}

impl Backend {
    fn mint(&self, email: &str) -> (String, String) {
        let access = format!("at-{}", Uuid::new_v4().simple());
        let refresh = format!("rt-{}", Uuid::new_v4().simple());
        lock(&self.access).insert(access.clone(), email.to_string());
        lock(&self.refresh).insert(refresh.clone(), email.to_string());
        (access, refresh)
    }

    fn bearer_email(&self, headers: &HeaderMap) -> Option<String> {
        let token = headers
            .get(header::AUTHORIZATION)?
            .to_str()
            .ok()?
            .strip_prefix("Bearer ")?;
        lock(&self.access).get(token).cloned()
    }

    fn user(&self, email: &str) -> Option<User> {
        lock(&self.accounts).get(email).map(|a| a.user.clone())
    }

    fn add_line(&self, email: &str, item: &ItemInput) {
        let mut carts = lock(&self.carts);
        let cart = carts.entry(email.to_string()).or_default();
        if let Some(line) = cart
            .iter_mut()
            .find(|line| line.product_id == item.product_id && line.size == item.size)
        {
            line.quantity += item.quantity;
        } else {
            cart.push(Line {
                product_id: item.product_id.clone(),
                size: item.size.clone(),
                quantity: item.quantity,
            });
        }
    }

    fn cart_json(&self, email: &str) -> Value {
        let carts = lock(&self.carts);
        let items: Vec<Value> = carts
            .get(email)
            .into_iter()
            .flatten()
            .map(|line| {
                json!({
                    "product": product(&line.product_id),
                    "size": line.size,
                    "quantity": line.quantity,
                })
            })
            .collect();
        json!({ "items": items })
    }
}

#[derive(Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

async fn login(State(backend): State<Arc<Backend>>, Json(body): Json<LoginBody>) -> Response {
    let account = lock(&backend.accounts).get(&body.email).cloned();
    match account {
        Some(account) if account.password == body.password => {
            let (access, refresh) = backend.mint(&body.email);
            success(json!({
                "user": account.user,
                "accessToken": access,
                "refreshToken": refresh,
            }))
        }
        _ => error(
            StatusCode::UNAUTHORIZED,
            "Invalid email or password",
            Some("invalid_credentials"),
        ),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupBody {
    first_name: String,
    last_name: String,
    email: String,
    password: String,
}

async fn signup(State(backend): State<Arc<Backend>>, Json(body): Json<SignupBody>) -> Response {
    let mut accounts = lock(&backend.accounts);
    if accounts.contains_key(&body.email) {
        return error(
            StatusCode::CONFLICT,
            "Email already registered",
            Some("email_taken"),
        );
    }
    let user = new_user(&body.email, &body.first_name, &body.last_name, UserRole::User);
    accounts.insert(
        body.email,
        Account {
            password: body.password,
            user: user.clone(),
        },
    );
    (StatusCode::CREATED, Json(json!({ "status": "success", "data": { "user": user } })))
        .into_response()
}

async fn me(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    match backend.bearer_email(&headers).and_then(|email| backend.user(&email)) {
        Some(user) => Json(json!({ "user": user })).into_response(),
        None => unauthorized(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshBody {
    refresh_token: String,
}

async fn refresh_token(
    State(backend): State<Arc<Backend>>,
    Json(body): Json<RefreshBody>,
) -> Response {
    backend.refresh_calls.fetch_add(1, Ordering::SeqCst);
    if backend.fail_refresh.load(Ordering::SeqCst) {
        return error(StatusCode::UNAUTHORIZED, "Invalid refresh token", None);
    }
    let email = lock(&backend.refresh).remove(&body.refresh_token);
    match email {
        Some(email) => {
            let (access, refresh) = backend.mint(&email);
            Json(json!({ "data": { "accessToken": access, "refreshToken": refresh } }))
                .into_response()
        }
        None => error(StatusCode::UNAUTHORIZED, "Invalid refresh token", None),
    }
}

async fn logout(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> StatusCode {
    backend.logout_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(token) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        lock(&backend.access).remove(token);
    }
    StatusCode::NO_CONTENT
}

async fn get_cart(State(backend): State<Arc<Backend>>, headers: HeaderMap) -> Response {
    match backend.bearer_email(&headers) {
        Some(email) => success(backend.cart_json(&email)),
        None => unauthorized(),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemInput {
    product_id: ProductId,
    #[serde(default)]
    size: Option<String>,
    quantity: u32,
}

#[derive(Deserialize)]
struct MergeBody {
    items: Vec<ItemInput>,
}

async fn merge_cart(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(body): Json<MergeBody>,
) -> Response {
    let Some(email) = backend.bearer_email(&headers) else {
        return unauthorized();
    };
    if backend.fail_merge.load(Ordering::SeqCst) {
        return error(StatusCode::SERVICE_UNAVAILABLE, "Cart service unavailable", None);
    }
    backend.merge_calls.fetch_add(1, Ordering::SeqCst);
    for item in &body.items {
        backend.add_line(&email, item);
    }
    success(backend.cart_json(&email))
}

async fn add_to_cart(
    State(backend): State<Arc<Backend>>,
    headers: HeaderMap,
    Json(item): Json<ItemInput>,
) -> Response {
    let Some(email) = backend.bearer_email(&headers) else {
        return unauthorized();
    };
    backend.add_line(&email, &item);
    success(backend.cart_json(&email))
}
