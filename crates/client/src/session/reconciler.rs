//! Keeps the token store, cookie mirror and token cache in agreement.
//!
//! A pass only corrects state. It never redirects; route guards read the
//! corrected state and decide for themselves.

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::events::SessionEvent;
use super::manager::SessionManager;

/// What a reconciler pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Store not hydrated yet; nothing inspected.
    NotHydrated,
    /// Everything already agreed.
    InSync,
    /// Store claimed a session without a cookie; logged out locally.
    Mismatch,
    /// Cache set to the cookie's token.
    CacheRepaired,
    /// Stray cache value cleared.
    CacheCleared,
    /// Unauthenticated store held a token pair; session restored via refresh.
    Restored,
    /// Restore attempt failed; local session cleared.
    RestoreFailed,
}

enum Plan {
    Done(ReconcileOutcome),
    Restore,
}

impl SessionManager {
    /// Run one reconciliation pass.
    pub async fn reconcile(&self) -> ReconcileOutcome {
        let plan = {
            let _guard = self.write_guard();
            self.plan_locked()
        };

        match plan {
            Plan::Done(outcome) => outcome,
            Plan::Restore => match self.restore_session().await {
                Ok(_) => ReconcileOutcome::Restored,
                Err(e) => {
                    debug!(error = %e, "Restore during reconciliation failed");
                    ReconcileOutcome::RestoreFailed
                }
            },
        }
    }

    fn plan_locked(&self) -> Plan {
        let session = self.session();
        if !session.hydrated {
            return Plan::Done(ReconcileOutcome::NotHydrated);
        }

        let cookie = self.cookies().read_auth_cookie();
        let auth = &session.auth;

        if auth.is_authenticated && auth.access_token().is_some() && cookie.is_none() {
            warn!("Session cookie missing for an authenticated session, logging out");
            self.clear_local_session();
            self.emit(SessionEvent::SessionMismatch);
            self.emit(SessionEvent::LoggedOut { redirect_to: None });
            return Plan::Done(ReconcileOutcome::Mismatch);
        }

        if let Some(token) = cookie {
            if self.cache().get().as_deref() == Some(token.as_str()) {
                return Plan::Done(ReconcileOutcome::InSync);
            }
            debug!("Token cache drifted from cookie, repairing");
            self.cache().set(token);
            return Plan::Done(ReconcileOutcome::CacheRepaired);
        }

        if !auth.is_authenticated && auth.access_token().is_some() && auth.refresh_token().is_some() {
            return Plan::Restore;
        }

        if self.cache().get().is_some() {
            debug!("Clearing token cache without a backing cookie");
            self.cache().clear();
            return Plan::Done(ReconcileOutcome::CacheCleared);
        }

        Plan::Done(ReconcileOutcome::InSync)
    }

    /// Reconcile after hydration and whenever authentication or the access
    /// token changes.
    #[must_use]
    pub fn spawn_reconciler(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let mut rx = manager.subscribe();

        tokio::spawn(async move {
            let mut last = None;
            loop {
                let key = {
                    let session = rx.borrow_and_update();
                    (
                        session.hydrated,
                        session.auth.is_authenticated,
                        session.auth.access_token.clone(),
                    )
                };
                if last.as_ref() != Some(&key) {
                    last = Some(key);
                    let outcome = manager.reconcile().await;
                    debug!(?outcome, "Reconciled session");
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
