//! Token store: the single writer of [`Session`] state.
//!
//! Transitions run inside `watch::Sender::send_modify`, so they are
//! serialized and subscribers are only woken once a transition has fully
//! applied. Every transition is written through to the persisted snapshot
//! before the watch lock is released.

use std::sync::Arc;

use atelier_core::{User, UserPatch};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::state::{AuthState, Session};
use crate::api::TokenPair;
use crate::persist::Persistor;

/// Holds the session record and publishes every change.
#[derive(Clone)]
pub struct TokenStore {
    state: Arc<watch::Sender<Session>>,
    persistor: Arc<Persistor>,
}

impl TokenStore {
    /// Create an empty, not yet hydrated store.
    #[must_use]
    pub fn new(persistor: Arc<Persistor>) -> Self {
        let (state, _) = watch::channel(Session::default());
        Self {
            state: Arc::new(state),
            persistor,
        }
    }

    /// Load the persisted auth slice and mark the store hydrated.
    ///
    /// Subsequent calls are no-ops.
    pub fn hydrate(&self) {
        let restored = self.persistor.snapshot().auth.rehydrate();
        let hydrated = self.state.send_if_modified(|session| {
            if session.hydrated {
                return false;
            }
            session.auth = restored;
            session.hydrated = true;
            true
        });
        if hydrated {
            debug!(
                authenticated = self.state.borrow().auth.is_authenticated,
                "Session store hydrated"
            );
        }
    }

    /// Current session.
    #[must_use]
    pub fn session(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Receiver notified after each completed transition.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Current epoch.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.state.borrow().epoch
    }

    /// A login request started.
    pub fn login_start(&self) {
        self.transition(|session| {
            session.auth.is_loading = true;
            session.auth.error = None;
        });
    }

    /// The only transition that authenticates. Sets user and both tokens at once.
    pub fn login_success(&self, user: User, tokens: TokenPair) {
        self.transition(|session| {
            session.auth = AuthState {
                user: Some(user),
                access_token: Some(tokens.access_token),
                refresh_token: Some(tokens.refresh_token),
                is_authenticated: true,
                is_loading: false,
                error: None,
            };
            session.epoch += 1;
        });
    }

    /// Reset to logged out, recording the reason for display.
    pub fn login_failure(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.transition(|session| {
            session.auth = AuthState {
                error: Some(reason),
                ..AuthState::default()
            };
            session.epoch += 1;
        });
    }

    /// Replace both tokens, leaving identity and authentication untouched.
    pub fn update_tokens(&self, tokens: TokenPair) {
        self.transition(|session| {
            session.auth.access_token = Some(tokens.access_token);
            session.auth.refresh_token = Some(tokens.refresh_token);
        });
    }

    /// Replace both tokens only if no login or logout happened since `epoch`.
    ///
    /// Returns `false` (and changes nothing) for stale results.
    pub fn update_tokens_if_current(&self, epoch: u64, tokens: TokenPair) -> bool {
        let mut applied = false;
        self.transition(|session| {
            if session.epoch == epoch {
                session.auth.access_token = Some(tokens.access_token);
                session.auth.refresh_token = Some(tokens.refresh_token);
                applied = true;
            }
        });
        applied
    }

    /// Apply a partial profile update. Ignored while no user is present.
    pub fn update_user(&self, patch: UserPatch) {
        self.transition(|session| {
            if let Some(user) = session.auth.user.as_mut() {
                user.apply(patch);
            }
        });
    }

    /// Reset every field to the logged-out state.
    pub fn logout(&self) {
        self.transition(|session| {
            session.auth = AuthState::default();
            session.epoch += 1;
        });
    }

    /// Apply `f` and persist the result while still holding the watch lock,
    /// so snapshots are written in the order transitions were applied.
    fn transition(&self, f: impl FnOnce(&mut Session)) {
        self.state.send_modify(|session| {
            f(session);
            if !session.auth.is_consistent() {
                warn!("Session invariant violated, resetting to logged out");
                session.auth = AuthState::default();
                session.epoch += 1;
            }
            self.persistor.save_auth(session.auth.persisted());
        });
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("session", &*self.state.borrow())
            .finish_non_exhaustive()
    }
}
