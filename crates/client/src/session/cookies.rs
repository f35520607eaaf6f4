//! Cookie mirror for the request-time gatekeeper.
//!
//! The gatekeeper cannot read the persisted store, so the access token and
//! the role are duplicated into `auth-token` and `user-role` cookies
//! (`Path=/`, `SameSite=Lax`, default 7 day expiry).

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub use atelier_core::{AUTH_TOKEN_COOKIE, USER_ROLE_COOKIE};
use atelier_core::UserRole;
use cookie::time::{Duration as CookieDuration, OffsetDateTime};
use cookie::{Cookie, SameSite};
use reqwest::header::HeaderValue;
use tracing::{debug, warn};
use url::Url;

use crate::persist::write_atomically;

/// Storage the mirror writes cookies into.
pub trait CookieBackend: Send + Sync {
    /// Value of an unexpired cookie.
    fn get(&self, name: &str) -> Option<String>;

    /// Store a cookie. Cookies already expired remove any existing entry.
    fn set(&self, cookie: Cookie<'static>);

    /// All unexpired cookies.
    fn all(&self) -> Vec<Cookie<'static>>;
}

fn is_expired(cookie: &Cookie<'_>, now: OffsetDateTime) -> bool {
    if cookie.max_age().is_some_and(|age| age <= CookieDuration::ZERO) {
        return true;
    }
    cookie.expires_datetime().is_some_and(|at| at <= now)
}

/// Cookie jar living in process memory.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<BTreeMap<String, Cookie<'static>>>,
}

impl MemoryCookieJar {
    /// Empty jar.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove a cookie without writing an expiry (simulates out-of-band deletion).
    pub fn delete(&self, name: &str) {
        self.lock().remove(name);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Cookie<'static>>> {
        self.cookies.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CookieBackend for MemoryCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        let now = OffsetDateTime::now_utc();
        self.lock()
            .get(name)
            .filter(|cookie| !is_expired(cookie, now))
            .map(|cookie| cookie.value().to_string())
    }

    fn set(&self, cookie: Cookie<'static>) {
        let mut cookies = self.lock();
        if is_expired(&cookie, OffsetDateTime::now_utc()) {
            cookies.remove(cookie.name());
        } else {
            cookies.insert(cookie.name().to_string(), cookie);
        }
    }

    fn all(&self) -> Vec<Cookie<'static>> {
        let now = OffsetDateTime::now_utc();
        self.lock()
            .values()
            .filter(|cookie| !is_expired(cookie, now))
            .cloned()
            .collect()
    }
}

/// Cookie jar persisted as a JSON list of `Set-Cookie` strings.
///
/// Used by the command line so cookies outlive the process, the way browser
/// cookies outlive a page reload.
#[derive(Debug)]
pub struct FileCookieJar {
    path: PathBuf,
    jar: MemoryCookieJar,
}

impl FileCookieJar {
    /// Open the jar at `path`, dropping unreadable or expired entries.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let jar = MemoryCookieJar::new();

        match std::fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Vec<String>>(&contents) {
                Ok(lines) => {
                    for line in lines {
                        match Cookie::parse(line) {
                            Ok(cookie) => jar.set(cookie.into_owned()),
                            Err(e) => warn!(error = %e, "Skipping unreadable cookie"),
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Discarding unreadable cookie jar"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "Failed to read cookie jar"),
        }

        Self { path, jar }
    }

    fn flush(&self) {
        let lines: Vec<String> = self.jar.all().iter().map(ToString::to_string).collect();
        let result = serde_json::to_string_pretty(&lines)
            .map_err(crate::persist::PersistenceError::from)
            .and_then(|contents| write_atomically(&self.path, &contents));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist cookie jar");
        }
    }
}

impl CookieBackend for FileCookieJar {
    fn get(&self, name: &str) -> Option<String> {
        self.jar.get(name)
    }

    fn set(&self, cookie: Cookie<'static>) {
        self.jar.set(cookie);
        self.flush();
    }

    fn all(&self) -> Vec<Cookie<'static>> {
        self.jar.all()
    }
}

/// Result of a confirmed cookie write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CookieWrite {
    /// Observable on the first re-read.
    Confirmed,
    /// Observable only after writing a second time.
    ConfirmedOnRetry,
    /// Still not observable; the caller proceeds optimistically.
    Unconfirmed,
}

/// Writes and reads the `auth-token`/`user-role` pair.
#[derive(Clone)]
pub struct CookieMirror {
    backend: Arc<dyn CookieBackend>,
    days: i64,
    confirm_delay: Duration,
}

impl CookieMirror {
    /// Mirror over `backend` with the given expiry and confirmation delay.
    #[must_use]
    pub fn new(backend: Arc<dyn CookieBackend>, days: i64, confirm_delay: Duration) -> Self {
        Self {
            backend,
            days,
            confirm_delay,
        }
    }

    /// Build a cookie with the mirror's policy.
    #[must_use]
    pub fn build_cookie(name: &str, value: &str, days: i64) -> Cookie<'static> {
        Cookie::build((name.to_string(), value.to_string()))
            .path("/")
            .same_site(SameSite::Lax)
            .expires(OffsetDateTime::now_utc() + CookieDuration::days(days))
            .build()
    }

    fn expired_cookie(name: &str) -> Cookie<'static> {
        Cookie::build((name.to_string(), String::new()))
            .path("/")
            .same_site(SameSite::Lax)
            .max_age(CookieDuration::ZERO)
            .expires(OffsetDateTime::UNIX_EPOCH)
            .build()
    }

    /// Write the token cookie without waiting for confirmation.
    pub fn write_auth_cookie(&self, token: &str) {
        self.write_cookie(AUTH_TOKEN_COOKIE, token);
    }

    /// Write the role cookie without waiting for confirmation.
    pub fn write_role_cookie(&self, role: UserRole) {
        self.write_cookie(USER_ROLE_COOKIE, role.as_str());
    }

    /// Write the token cookie and confirm it can be read back.
    pub async fn set_auth_cookie(&self, token: &str) -> CookieWrite {
        self.write_auth_cookie(token);
        self.confirm(AUTH_TOKEN_COOKIE, token).await
    }

    /// Write the role cookie and confirm it can be read back.
    pub async fn set_role_cookie(&self, role: UserRole) -> CookieWrite {
        self.write_role_cookie(role);
        self.confirm(USER_ROLE_COOKIE, role.as_str()).await
    }

    /// Re-read a written cookie after a short delay and rewrite it once if absent.
    ///
    /// Never fails: an unconfirmed write is logged and left for the
    /// reconciler to catch on its next pass.
    pub async fn confirm(&self, name: &str, value: &str) -> CookieWrite {
        self.confirm_with(name, value, || {
            self.write_cookie(name, value);
            true
        })
        .await
    }

    /// Like [`confirm`](Self::confirm), but the rewrite is delegated to `rewrite`.
    ///
    /// `rewrite` returns `false` when the value is no longer wanted (the
    /// session moved on while waiting); nothing is written and the result is
    /// `Unconfirmed`.
    pub async fn confirm_with(
        &self,
        name: &str,
        value: &str,
        rewrite: impl FnOnce() -> bool,
    ) -> CookieWrite {
        tokio::time::sleep(self.confirm_delay).await;
        if self.backend.get(name).as_deref() == Some(value) {
            return CookieWrite::Confirmed;
        }

        debug!(cookie = name, "Cookie not observable yet, writing again");
        if !rewrite() {
            debug!(cookie = name, "Session changed, cookie left as is");
            return CookieWrite::Unconfirmed;
        }
        tokio::time::sleep(self.confirm_delay).await;
        if self.backend.get(name).as_deref() == Some(value) {
            return CookieWrite::ConfirmedOnRetry;
        }

        warn!(cookie = name, "Cookie write could not be confirmed, proceeding");
        CookieWrite::Unconfirmed
    }

    /// Write `name=value` with the mirror's policy.
    pub(crate) fn write_cookie(&self, name: &str, value: &str) {
        self.backend.set(Self::build_cookie(name, value, self.days));
    }

    /// Expire both cookies immediately.
    pub fn clear_auth_cookies(&self) {
        self.backend.set(Self::expired_cookie(AUTH_TOKEN_COOKIE));
        self.backend.set(Self::expired_cookie(USER_ROLE_COOKIE));
    }

    /// The access token cookie, if present and non-empty.
    #[must_use]
    pub fn read_auth_cookie(&self) -> Option<String> {
        self.backend
            .get(AUTH_TOKEN_COOKIE)
            .filter(|token| !token.trim().is_empty())
    }

    /// The role cookie, if present.
    #[must_use]
    pub fn read_role_cookie(&self) -> Option<String> {
        self.backend
            .get(USER_ROLE_COOKIE)
            .filter(|role| !role.is_empty())
    }

    /// `Cookie` request header value for every live cookie.
    #[must_use]
    pub fn header_value(&self) -> Option<String> {
        let pairs: Vec<String> = self
            .backend
            .all()
            .iter()
            .map(|cookie| format!("{}={}", cookie.name(), cookie.value()))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

/// Lets a `reqwest::Client` present the mirrored cookies to the storefront edge.
impl reqwest::cookie::CookieStore for CookieMirror {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, _url: &Url) {
        for header in cookie_headers {
            let Ok(raw) = header.to_str() else { continue };
            if let Ok(cookie) = Cookie::parse(raw.to_string()) {
                self.backend.set(cookie.into_owned());
            }
        }
    }

    fn cookies(&self, _url: &Url) -> Option<HeaderValue> {
        self.header_value()
            .and_then(|value| HeaderValue::from_str(&value).ok())
    }
}

impl std::fmt::Debug for CookieMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieMirror")
            .field("days", &self.days)
            .field("confirm_delay", &self.confirm_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Drops the first `n` writes, like a browser that persists cookies lazily.
    struct LossyJar {
        inner: MemoryCookieJar,
        drop_writes: AtomicUsize,
    }

    impl LossyJar {
        fn new(drop_writes: usize) -> Self {
            Self {
                inner: MemoryCookieJar::new(),
                drop_writes: AtomicUsize::new(drop_writes),
            }
        }
    }

    impl CookieBackend for LossyJar {
        fn get(&self, name: &str) -> Option<String> {
            self.inner.get(name)
        }

        fn set(&self, cookie: Cookie<'static>) {
            if self
                .drop_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                self.inner.set(cookie);
            }
        }

        fn all(&self) -> Vec<Cookie<'static>> {
            self.inner.all()
        }
    }

    fn mirror(backend: Arc<dyn CookieBackend>) -> CookieMirror {
        CookieMirror::new(backend, 7, Duration::from_millis(1))
    }

    #[test]
    fn test_cookie_policy() {
        let cookie = CookieMirror::build_cookie(AUTH_TOKEN_COOKIE, "tok", 7);
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        let expires = cookie.expires_datetime().unwrap();
        let in_six_days = OffsetDateTime::now_utc() + CookieDuration::days(6);
        assert!(expires > in_six_days);
    }

    #[tokio::test]
    async fn test_set_and_clear() {
        let mirror = mirror(Arc::new(MemoryCookieJar::new()));
        assert_eq!(mirror.set_auth_cookie("tok-1234567890").await, CookieWrite::Confirmed);
        assert_eq!(mirror.set_role_cookie(UserRole::Admin).await, CookieWrite::Confirmed);
        assert_eq!(mirror.read_auth_cookie().as_deref(), Some("tok-1234567890"));
        assert_eq!(mirror.read_role_cookie().as_deref(), Some("admin"));

        mirror.clear_auth_cookies();
        assert!(mirror.read_auth_cookie().is_none());
        assert!(mirror.read_role_cookie().is_none());
        assert!(mirror.header_value().is_none());
    }

    #[tokio::test]
    async fn test_retry_once_when_first_write_is_lost() {
        let mirror = mirror(Arc::new(LossyJar::new(1)));
        assert_eq!(
            mirror.set_auth_cookie("tok-1234567890").await,
            CookieWrite::ConfirmedOnRetry
        );
        assert_eq!(mirror.read_auth_cookie().as_deref(), Some("tok-1234567890"));
    }

    #[tokio::test]
    async fn test_unconfirmed_write_does_not_fail() {
        let mirror = mirror(Arc::new(LossyJar::new(2)));
        assert_eq!(
            mirror.set_auth_cookie("tok-1234567890").await,
            CookieWrite::Unconfirmed
        );
        assert!(mirror.read_auth_cookie().is_none());
    }

    #[tokio::test]
    async fn test_cleared_cookie_is_not_resurrected_when_rewrite_declines() {
        let mirror = mirror(Arc::new(MemoryCookieJar::new()));
        mirror.write_auth_cookie("tok-1234567890");
        mirror.clear_auth_cookies();

        let write = mirror
            .confirm_with(AUTH_TOKEN_COOKIE, "tok-1234567890", || false)
            .await;

        assert_eq!(write, CookieWrite::Unconfirmed);
        assert!(mirror.read_auth_cookie().is_none());
    }

    #[test]
    fn test_file_jar_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cookies.json");
        {
            let jar = FileCookieJar::open(&path);
            jar.set(CookieMirror::build_cookie(AUTH_TOKEN_COOKIE, "tok-1234567890", 7));
            jar.set(CookieMirror::build_cookie(USER_ROLE_COOKIE, "user", 7));
        }
        let reopened = FileCookieJar::open(&path);
        assert_eq!(reopened.get(AUTH_TOKEN_COOKIE).as_deref(), Some("tok-1234567890"));
        assert_eq!(reopened.get(USER_ROLE_COOKIE).as_deref(), Some("user"));
    }

    #[test]
    fn test_header_value_for_reqwest() {
        use reqwest::cookie::CookieStore as _;

        let jar = Arc::new(MemoryCookieJar::new());
        let mirror = mirror(jar.clone());
        mirror.write_auth_cookie("tok-1234567890");
        let url = Url::parse("http://localhost/cart").unwrap();
        let header = mirror.cookies(&url).unwrap();
        assert_eq!(header.to_str().unwrap(), "auth-token=tok-1234567890");
    }
}
