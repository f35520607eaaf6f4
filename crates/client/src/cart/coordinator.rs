//! Cart merge coordinator.
//!
//! On the false-to-true authentication edge it waits briefly, transfers the
//! guest cart into the server cart (if there is anything to transfer) and
//! then fetches the authoritative server cart.
//!
//! ```text
//! Idle -> Waiting -> Merging -> Fetching -> Done
//!                 \________________/
//!                  (empty guest cart)
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use atelier_core::{ProductSnapshot, Size};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiError, CartItemInput, ServerCart};
use crate::config::CartTimings;
use crate::persist::Persistor;
use crate::session::{NoticeLevel, SessionEvent, SessionManager};

/// Errors from cart operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CartError {
    /// Server cart operations need a session.
    #[error("Not logged in")]
    NotAuthenticated,

    /// The remote call failed.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// A logout happened while the request was in flight.
    #[error("Session changed while the request was in flight")]
    Superseded,
}

/// Where the coordinator is in the post-login sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeState {
    /// No authenticated edge seen since the last logout.
    #[default]
    Idle,
    /// Delaying so a concurrent merge can finish first.
    Waiting,
    /// Transferring guest items.
    Merging,
    /// Fetching the server cart.
    Fetching,
    /// Sequence complete for this session.
    Done,
}

/// Drives guest-to-server cart transfer and server cart refreshes.
#[derive(Clone)]
pub struct CartCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    session: SessionManager,
    persistor: Arc<Persistor>,
    timings: CartTimings,
    state: watch::Sender<MergeState>,
    server_cart: RwLock<Option<ServerCart>>,
    merge_lock: tokio::sync::Mutex<()>,
    fetching: AtomicBool,
    fetch_generation: AtomicU64,
}

/// Clears the in-flight flag however the fetch ends.
struct FetchGuard<'a>(&'a AtomicBool);

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl CartCoordinator {
    #[must_use]
    pub fn new(session: SessionManager, persistor: Arc<Persistor>, timings: CartTimings) -> Self {
        let (state, _) = watch::channel(MergeState::Idle);
        Self {
            inner: Arc::new(Inner {
                session,
                persistor,
                timings,
                state,
                server_cart: RwLock::new(None),
                merge_lock: tokio::sync::Mutex::new(()),
                fetching: AtomicBool::new(false),
                fetch_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> MergeState {
        *self.inner.state.borrow()
    }

    /// Receiver for state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<MergeState> {
        self.inner.state.subscribe()
    }

    /// Last fetched server cart.
    #[must_use]
    pub fn server_cart(&self) -> Option<ServerCart> {
        self.inner
            .server_cart
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Watch the session and react to authentication edges.
    ///
    /// Only the false-to-true transition starts a merge; staying
    /// authenticated does not re-fire. Logging out resets the coordinator.
    #[must_use]
    pub fn run(&self) -> JoinHandle<()> {
        let coordinator = self.clone();
        let mut rx = self.inner.session.subscribe();

        tokio::spawn(async move {
            let mut was_authenticated = false;
            loop {
                let authenticated = rx.borrow_and_update().is_authenticated();
                if authenticated && !was_authenticated {
                    let coordinator = coordinator.clone();
                    tokio::spawn(async move { coordinator.on_authenticated().await });
                } else if !authenticated && was_authenticated {
                    coordinator.reset();
                }
                was_authenticated = authenticated;

                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Run the merge-or-fetch sequence once per session.
    ///
    /// Calls made while a sequence is running or already done are ignored.
    #[instrument(skip_all)]
    pub async fn on_authenticated(&self) {
        let started = self.inner.state.send_if_modified(|state| {
            if *state == MergeState::Idle {
                *state = MergeState::Waiting;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(state = ?self.state(), "Merge sequence already started");
            return;
        }

        let delay = if self.inner.merge_lock.try_lock().is_err() {
            self.inner.timings.merge_busy_delay
        } else {
            self.inner.timings.merge_delay
        };
        tokio::time::sleep(delay).await;

        if !self.inner.session.session().is_authenticated() {
            debug!("Logged out while waiting to merge");
            self.reset();
            return;
        }

        if !self.inner.persistor.guest_cart().is_empty() {
            self.set_state(MergeState::Merging);
            if let Err(e) = self.merge_guest_cart().await {
                warn!(error = %e, "Guest cart merge failed, items kept for a later retry");
            }
            if self.state() == MergeState::Idle {
                debug!("Logged out during merge");
                return;
            }
        }

        self.set_state(MergeState::Fetching);
        if let Err(e) = self.fetch_now().await {
            warn!(error = %e, "Failed to fetch server cart");
        }

        self.inner.state.send_if_modified(|state| {
            if *state == MergeState::Fetching {
                *state = MergeState::Done;
                true
            } else {
                false
            }
        });
    }

    /// Transfer the guest cart into the server cart.
    ///
    /// Merged quantities are subtracted from the guest cart only after the
    /// server accepted them, so a failure leaves everything queued locally.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without a token, `Api` if the merge call fails.
    #[instrument(skip_all)]
    pub async fn merge_guest_cart(&self) -> Result<Option<ServerCart>, CartError> {
        let _merging = self.inner.merge_lock.lock().await;

        let token = self.inner.session.bearer().ok_or(CartError::NotAuthenticated)?;
        let items = self.inner.persistor.guest_cart().to_merge_items();
        if items.is_empty() {
            return Ok(None);
        }

        match self.inner.session.api().merge_cart(&token, &items).await {
            Ok(cart) => {
                self.inner.persistor.update_cart(|guest| guest.subtract(&items));
                info!(lines = items.len(), "Guest cart merged");
                self.inner.session.emit(SessionEvent::notice(
                    NoticeLevel::Success,
                    "Your saved cart items were added to your account",
                ));
                self.store_server_cart(cart.clone());
                Ok(Some(cart))
            }
            Err(e) => {
                self.inner.session.emit(SessionEvent::notice(
                    NoticeLevel::Error,
                    "Could not sync your saved cart, it will be retried",
                ));
                Err(e.into())
            }
        }
    }

    /// Fetch the server cart unless a fetch is already running.
    ///
    /// Returns `Ok(None)` when suppressed by an in-flight fetch.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated`, `Superseded` after a logout, or `Api`.
    #[instrument(skip_all)]
    pub async fn fetch_now(&self) -> Result<Option<ServerCart>, CartError> {
        if self.inner.fetching.swap(true, Ordering::AcqRel) {
            debug!("Cart fetch already in flight");
            return Ok(None);
        }
        let _fetching = FetchGuard(&self.inner.fetching);

        let epoch = self.inner.session.store().epoch();
        let token = self.inner.session.bearer().ok_or(CartError::NotAuthenticated)?;
        let cart = self.inner.session.api().get_cart(&token).await?;

        if self.inner.session.store().epoch() != epoch {
            return Err(CartError::Superseded);
        }
        self.store_server_cart(cart.clone());
        Ok(Some(cart))
    }

    /// Schedule a fetch after the debounce window.
    ///
    /// Calls within the window collapse into the last one.
    pub fn request_fetch(&self) -> JoinHandle<()> {
        let generation = self.inner.fetch_generation.fetch_add(1, Ordering::AcqRel) + 1;
        let coordinator = self.clone();
        let debounce = self.inner.timings.fetch_debounce;

        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if coordinator.inner.fetch_generation.load(Ordering::Acquire) != generation {
                return;
            }
            if let Err(e) = coordinator.fetch_now().await {
                debug!(error = %e, "Debounced cart fetch failed");
            }
        })
    }

    /// Something outside the coordinator changed the server cart.
    pub fn notify_cart_changed(&self) -> JoinHandle<()> {
        self.request_fetch()
    }

    /// Add to the server cart while authenticated, otherwise to the guest cart.
    ///
    /// Returns the new total unit count of whichever cart was updated.
    ///
    /// # Errors
    ///
    /// `Api` if the server rejects the addition.
    #[instrument(skip_all, fields(product_id = %product.id))]
    pub async fn add_item(
        &self,
        product: ProductSnapshot,
        size: Option<Size>,
        quantity: u32,
    ) -> Result<u32, CartError> {
        let token = self
            .inner
            .session
            .bearer()
            .filter(|_| self.inner.session.session().is_authenticated());

        let Some(token) = token else {
            let total = self.inner.persistor.update_cart(|guest| {
                guest.add(product, size, quantity);
                guest.total_items()
            });
            self.inner
                .session
                .emit(SessionEvent::CartUpdated { total_items: total });
            return Ok(total);
        };

        let item = CartItemInput {
            product_id: product.id,
            size,
            quantity,
        };
        let cart = self.inner.session.api().add_to_cart(&token, &item).await?;
        let total = cart.total_items();
        self.store_server_cart(cart);
        Ok(total)
    }

    /// Wait until the post-login sequence finishes.
    ///
    /// Returns immediately when logged out. `false` on timeout.
    pub async fn wait_settled(&self, timeout: Duration) -> bool {
        if !self.inner.session.session().is_authenticated() {
            return true;
        }
        let mut rx = self.subscribe_state();
        tokio::time::timeout(timeout, rx.wait_for(|state| *state == MergeState::Done))
            .await
            .is_ok_and(|result| result.is_ok())
    }

    /// Forget the server cart and allow the next login to merge again.
    pub fn reset(&self) {
        self.set_state(MergeState::Idle);
        *self
            .inner
            .server_cart
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
        self.inner.fetch_generation.fetch_add(1, Ordering::AcqRel);
    }

    fn set_state(&self, next: MergeState) {
        self.inner.state.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
    }

    fn store_server_cart(&self, cart: ServerCart) {
        let total_items = cart.total_items();
        *self
            .inner
            .server_cart
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(cart);
        self.inner
            .session
            .emit(SessionEvent::CartUpdated { total_items });
    }
}

impl std::fmt::Debug for CartCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartCoordinator")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::Ordering;

    use atelier_core::{ProductId, UserRole};
    use secrecy::SecretString;

    use super::*;
    use crate::testing::{FakeApi, Harness, product, started};

    const SETTLE: Duration = Duration::from_secs(2);

    fn shopper() -> FakeApi {
        FakeApi::new().with_account("a@x.com", "secret1", UserRole::User)
    }

    async fn login(h: &Harness) {
        h.client
            .session()
            .login("a@x.com", &SecretString::from("secret1".to_string()))
            .await
            .unwrap();
    }

    async fn wait_for_state(coordinator: &CartCoordinator, state: MergeState) {
        let mut rx = coordinator.subscribe_state();
        tokio::time::timeout(SETTLE, rx.wait_for(|s| *s == state))
            .await
            .unwrap()
            .unwrap();
    }

    fn fill_guest_cart(h: &Harness) {
        h.persistor.update_cart(|cart| {
            cart.add(product("p1"), Some(Size::new("M")), 2);
            cart.add(product("p2"), Some(Size::new("L")), 1);
        });
    }

    #[tokio::test]
    async fn test_guest_cart_merged_once() {
        let h = started(shopper()).await;
        fill_guest_cart(&h);
        let cart = h.client.cart();

        login(&h).await;
        assert!(cart.wait_settled(SETTLE).await);

        let server = cart.server_cart().unwrap();
        assert_eq!(server.items.len(), 2);
        assert_eq!(server.quantity_of(&ProductId::new("p1"), Some(&Size::new("M"))), 2);
        assert_eq!(server.quantity_of(&ProductId::new("p2"), Some(&Size::new("L"))), 1);
        assert!(h.persistor.guest_cart().is_empty());

        cart.on_authenticated().await;
        cart.on_authenticated().await;
        assert_eq!(cart.merge_guest_cart().await.unwrap(), None);
        assert_eq!(h.api.merge_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.api.server_cart().total_items(), 3);
    }

    #[tokio::test]
    async fn test_empty_guest_cart_skips_merge() {
        let h = started(shopper()).await;
        let cart = h.client.cart();

        login(&h).await;
        assert!(cart.wait_settled(SETTLE).await);

        assert_eq!(cart.state(), MergeState::Done);
        assert_eq!(h.api.merge_calls.load(Ordering::SeqCst), 0);
        assert_eq!(cart.server_cart(), Some(ServerCart::default()));
    }

    #[tokio::test]
    async fn test_merge_failure_keeps_guest_items() {
        let api = shopper();
        api.fail_merge.store(true, Ordering::SeqCst);
        let h = started(api).await;
        fill_guest_cart(&h);
        let cart = h.client.cart();

        login(&h).await;
        assert!(cart.wait_settled(SETTLE).await);

        assert_eq!(h.persistor.guest_cart().total_items(), 3);
        assert_eq!(cart.server_cart(), Some(ServerCart::default()));

        h.api.fail_merge.store(false, Ordering::SeqCst);
        let merged = cart.merge_guest_cart().await.unwrap().unwrap();
        assert_eq!(merged.total_items(), 3);
        assert!(h.persistor.guest_cart().is_empty());
    }

    #[tokio::test]
    async fn test_logout_resets_for_next_login() {
        let h = started(shopper()).await;
        let cart = h.client.cart();

        login(&h).await;
        assert!(cart.wait_settled(SETTLE).await);

        h.client.session().logout().await;
        wait_for_state(cart, MergeState::Idle).await;
        assert!(cart.server_cart().is_none());

        fill_guest_cart(&h);
        login(&h).await;
        wait_for_state(cart, MergeState::Done).await;
        assert_eq!(h.api.merge_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cart.server_cart().unwrap().total_items(), 3);
    }

    #[tokio::test]
    async fn test_fetch_requests_are_debounced() {
        let h = started(shopper()).await;
        let cart = h.client.cart();
        login(&h).await;
        assert!(cart.wait_settled(SETTLE).await);
        let before = h.api.cart_fetches.load(Ordering::SeqCst);

        cart.notify_cart_changed();
        cart.request_fetch();
        cart.request_fetch().await.unwrap();

        assert_eq!(h.api.cart_fetches.load(Ordering::SeqCst), before + 1);
    }

    #[tokio::test]
    async fn test_overlapping_fetch_is_suppressed() {
        let h = started(shopper()).await;
        let cart = h.client.cart();
        login(&h).await;
        assert!(cart.wait_settled(SETTLE).await);

        let (first, second) = tokio::join!(cart.fetch_now(), cart.fetch_now());
        assert!(first.unwrap().is_some());
        assert!(second.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_add_item_targets_guest_or_server_cart() {
        let h = started(shopper()).await;
        let cart = h.client.cart();

        let total = cart.add_item(product("p1"), None, 2).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(h.persistor.guest_cart().total_items(), 2);

        login(&h).await;
        assert!(cart.wait_settled(SETTLE).await);

        let total = cart.add_item(product("p3"), Some(Size::new("S")), 1).await.unwrap();
        assert_eq!(total, 3);
        assert!(h.persistor.guest_cart().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_requires_session() {
        let h = started(shopper()).await;
        assert_eq!(
            h.client.cart().fetch_now().await.unwrap_err(),
            CartError::NotAuthenticated
        );
    }
}
