//! Composition root: wires API, persistence, cookies and the coordinators.

use std::sync::{Arc, Mutex, PoisonError};

use reqwest::redirect::Policy;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::api::{ApiError, HttpApi, RemoteApi};
use crate::cart::CartCoordinator;
use crate::config::{ClientConfig, ConfigError};
use crate::persist::{FileBackend, Persistor};
use crate::session::{CookieBackend, CookieMirror, FileCookieJar, SessionManager, TokenCache, TokenStore};

/// Errors building a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to prepare state directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to build HTTP client: {0}")]
    Api(#[from] ApiError),
}

/// A fully wired client: session manager plus cart coordinator.
///
/// Cheap to clone. Call [`AtelierClient::start`] to hydrate and launch the
/// reconciler and cart watcher.
#[derive(Clone)]
pub struct AtelierClient {
    inner: Arc<Inner>,
}

struct Inner {
    session: SessionManager,
    cart: CartCoordinator,
    persistor: Arc<Persistor>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AtelierClient {
    /// Build a client persisting to `config.state_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be created or the
    /// HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        std::fs::create_dir_all(&config.state_dir)?;

        let api: Arc<dyn RemoteApi> = Arc::new(HttpApi::new(config)?);
        let persistor = Arc::new(Persistor::open(FileBackend::new(config.snapshot_path())));
        let cookies: Arc<dyn CookieBackend> = Arc::new(FileCookieJar::open(config.cookie_path()));

        Ok(Self::from_parts(api, persistor, cookies, config))
    }

    /// Build a client from explicit parts.
    #[must_use]
    pub fn from_parts(
        api: Arc<dyn RemoteApi>,
        persistor: Arc<Persistor>,
        cookies: Arc<dyn CookieBackend>,
        config: &ClientConfig,
    ) -> Self {
        let store = TokenStore::new(Arc::clone(&persistor));
        let mirror = CookieMirror::new(cookies, config.cookie_days, config.cookie_confirm_delay);
        let session = SessionManager::new(api, store, mirror, TokenCache::new());
        let cart = CartCoordinator::new(session.clone(), Arc::clone(&persistor), config.cart);

        Self {
            inner: Arc::new(Inner {
                session,
                cart,
                persistor,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Hydrate the store and start the background watchers.
    ///
    /// The first reconciler pass has completed when this returns.
    pub async fn start(&self) {
        self.inner.session.hydrate();
        let outcome = self.inner.session.reconcile().await;
        debug!(?outcome, "Initial reconciliation");

        let reconciler = self.inner.session.spawn_reconciler();
        let cart = self.inner.cart.run();
        self.lock_tasks().extend([reconciler, cart]);
    }

    /// Stop the background watchers.
    pub fn shutdown(&self) {
        for task in self.lock_tasks().drain(..) {
            task.abort();
        }
    }

    #[must_use]
    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    #[must_use]
    pub fn cart(&self) -> &CartCoordinator {
        &self.inner.cart
    }

    #[must_use]
    pub fn persistor(&self) -> &Persistor {
        &self.inner.persistor
    }

    /// HTTP client for the storefront edge that presents the mirrored cookies.
    ///
    /// Redirects are not followed so gatekeeper decisions stay visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be built.
    pub fn edge_client(&self) -> Result<reqwest::Client, ClientError> {
        reqwest::Client::builder()
            .cookie_provider(Arc::new(self.inner.session.cookies().clone()))
            .redirect(Policy::none())
            .build()
            .map_err(|e| ClientError::Api(e.into()))
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for AtelierClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtelierClient")
            .field("session", &self.inner.session)
            .field("cart", &self.inner.cart)
            .finish_non_exhaustive()
    }
}
