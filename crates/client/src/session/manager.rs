//! The session handle injected into every consumer.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{broadcast, watch};
use tracing::debug;

use super::cache::TokenCache;
use super::cookies::CookieMirror;
use super::events::SessionEvent;
use super::state::Session;
use super::store::TokenStore;
use crate::api::RemoteApi;

const EVENT_CAPACITY: usize = 64;

/// Owns the token store, cookie mirror and token cache.
///
/// Auth operations and the reconciler are the only writers. Writes to the
/// three holders happen under one lock so no observer sees them half-applied.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn RemoteApi>,
    store: TokenStore,
    cookies: CookieMirror,
    cache: TokenCache,
    events: broadcast::Sender<SessionEvent>,
    write_lock: Mutex<()>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl SessionManager {
    /// Assemble a manager from its parts.
    #[must_use]
    pub fn new(
        api: Arc<dyn RemoteApi>,
        store: TokenStore,
        cookies: CookieMirror,
        cache: TokenCache,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                api,
                store,
                cookies,
                cache,
                events,
                write_lock: Mutex::new(()),
                refresh_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Current session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.inner.store.session()
    }

    /// Receiver notified after every store transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.inner.store.subscribe()
    }

    /// Receiver for user-facing notifications.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Bearer token for outgoing requests, read from the in-memory cache.
    #[must_use]
    pub fn bearer(&self) -> Option<String> {
        self.inner.cache.get()
    }

    /// Load the persisted snapshot.
    pub fn hydrate(&self) {
        self.inner.store.hydrate();
    }

    #[must_use]
    pub fn store(&self) -> &TokenStore {
        &self.inner.store
    }

    #[must_use]
    pub fn cookies(&self) -> &CookieMirror {
        &self.inner.cookies
    }

    #[must_use]
    pub fn cache(&self) -> &TokenCache {
        &self.inner.cache
    }

    pub(crate) fn api(&self) -> &dyn RemoteApi {
        self.inner.api.as_ref()
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        // No receivers is fine: nobody is rendering.
        if self.inner.events.send(event).is_err() {
            debug!("Session event dropped, no subscribers");
        }
    }

    /// Serializes store/cookie/cache writes. Never held across an await.
    pub(crate) fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.inner
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) async fn refresh_guard(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.inner.refresh_lock.lock().await
    }

    /// Clear cookies, cache and store, in that order. Caller holds the write guard.
    pub(crate) fn clear_local_session(&self) {
        self.inner.cookies.clear_auth_cookies();
        self.inner.cache.clear();
        self.inner.store.logout();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("store", &self.inner.store)
            .field("cookies", &self.inner.cookies)
            .field("cache", &self.inner.cache)
            .finish_non_exhaustive()
    }
}
