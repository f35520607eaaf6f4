//! Client session: token store, cookie mirror, token cache, reconciler and
//! auth operations behind one injected [`SessionManager`].

mod auth;
mod cache;
pub mod cookies;
mod events;
mod manager;
mod reconciler;
mod state;
mod store;

pub use auth::AuthFailure;
pub use cache::TokenCache;
pub use cookies::{
    AUTH_TOKEN_COOKIE, CookieBackend, CookieMirror, CookieWrite, FileCookieJar, MemoryCookieJar,
    USER_ROLE_COOKIE,
};
pub use events::{LOGIN_PATH, NoticeLevel, SessionEvent};
pub use manager::SessionManager;
pub use reconciler::ReconcileOutcome;
pub use state::{AuthState, PersistedAuth, Session};
pub use store::TokenStore;
