//! Auth operations: login, signup, refresh, logout and silent restore.
//!
//! Each operation writes cookie, cache and store together under the
//! manager's write guard. The cookie and cache are written first so the
//! reconciler, woken by the store transition, already sees them.

use atelier_core::{Email, User, UserPatch};
use secrecy::SecretString;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::cookies::{AUTH_TOKEN_COOKIE, CookieWrite, USER_ROLE_COOKIE};
use super::events::{LOGIN_PATH, NoticeLevel, SessionEvent};
use super::manager::SessionManager;
use crate::api::{ApiError, SignupRequest, TokenPair};

/// Why an auth operation did not succeed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthFailure {
    /// The API could not be reached.
    #[error("Unable to reach the server: {0}")]
    Network(String),

    /// The server (or local validation) refused the request.
    #[error("{message}")]
    Rejected {
        /// Displayable reason.
        message: String,
        /// Server-provided code, if any.
        code: Option<String>,
    },

    /// The response was missing expected fields.
    #[error("Unexpected response from server: {0}")]
    MalformedResponse(String),

    /// Refresh failed; the session has been logged out.
    #[error("Your session has expired, please log in again")]
    SessionExpired,

    /// Refresh was requested without a refresh token.
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// The operation needs an authenticated session.
    #[error("Not logged in")]
    NotAuthenticated,

    /// A login or logout happened while the request was in flight.
    #[error("Session changed while the request was in flight")]
    Superseded,
}

impl AuthFailure {
    /// Machine-readable failure code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Network(_) => "network_error",
            Self::Rejected { code, .. } => code.as_deref().unwrap_or("invalid_credentials"),
            Self::MalformedResponse(_) => "malformed_response",
            Self::SessionExpired => "session_expired",
            Self::MissingRefreshToken => "missing_refresh_token",
            Self::NotAuthenticated => "not_authenticated",
            Self::Superseded => "superseded",
        }
    }

    fn invalid_input(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            code: Some("invalid_credentials".to_string()),
        }
    }
}

impl From<ApiError> for AuthFailure {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Network(message) => Self::Network(message),
            ApiError::Rejected { message, code, .. } => Self::Rejected { message, code },
            ApiError::Status { status, .. } => Self::Rejected {
                message: format!("Request failed with status {status}"),
                code: None,
            },
            ApiError::Malformed(message) => Self::MalformedResponse(message),
        }
    }
}

impl SessionManager {
    /// Verify credentials and establish a session.
    ///
    /// Every failure path resets the store via `login_failure` and comes
    /// back as an `Err`; nothing panics or escapes.
    ///
    /// # Errors
    ///
    /// Returns the categorized failure.
    #[instrument(skip_all)]
    pub async fn login(&self, email: &str, password: &SecretString) -> Result<User, AuthFailure> {
        self.store().login_start();

        let result = match Email::parse(email) {
            Ok(email) => self
                .api()
                .login(&email, password)
                .await
                .and_then(|payload| Ok((payload.user, payload.tokens.validated()?)))
                .map_err(AuthFailure::from),
            Err(e) => Err(AuthFailure::invalid_input(e.to_string())),
        };

        match result {
            Ok((user, tokens)) => {
                self.establish(user.clone(), tokens).await;
                info!(user_id = %user.id, role = %user.role, "Logged in");
                self.emit(SessionEvent::notice(
                    NoticeLevel::Success,
                    format!("Welcome back, {}!", user.first_name),
                ));
                Ok(user)
            }
            Err(failure) => {
                warn!(code = failure.code(), error = %failure, "Login failed");
                {
                    let _guard = self.write_guard();
                    self.cookies().clear_auth_cookies();
                    self.cache().clear();
                    self.store().login_failure(failure.to_string());
                }
                self.emit(SessionEvent::notice(NoticeLevel::Error, failure.to_string()));
                Err(failure)
            }
        }
    }

    /// Register an account. Does not log in.
    ///
    /// # Errors
    ///
    /// Returns the categorized failure.
    #[instrument(skip_all)]
    pub async fn signup(
        &self,
        first_name: &str,
        last_name: &str,
        email: &str,
        password: SecretString,
    ) -> Result<User, AuthFailure> {
        let email = Email::parse(email).map_err(|e| AuthFailure::invalid_input(e.to_string()))?;
        let request = SignupRequest {
            first_name: first_name.trim().to_string(),
            last_name: last_name.trim().to_string(),
            email,
            password,
        };

        match self.api().signup(&request).await {
            Ok(user) => {
                info!(user_id = %user.id, "Account created");
                self.emit(SessionEvent::notice(
                    NoticeLevel::Success,
                    "Account created, please log in",
                ));
                Ok(user)
            }
            Err(e) => {
                let failure = AuthFailure::from(e);
                warn!(code = failure.code(), error = %failure, "Signup failed");
                self.emit(SessionEvent::notice(NoticeLevel::Error, failure.to_string()));
                Err(failure)
            }
        }
    }

    /// Rotate the token pair.
    ///
    /// Any failure logs the session out. Results that arrive after a login
    /// or logout are discarded.
    ///
    /// # Errors
    ///
    /// `MissingRefreshToken` without a refresh token, `Superseded` for stale
    /// results, `SessionExpired` after a failed refresh.
    #[instrument(skip_all)]
    pub async fn refresh_access_token(&self) -> Result<(), AuthFailure> {
        let _refreshing = self.refresh_guard().await;

        let session = self.session();
        let Some(refresh_token) = session.auth.refresh_token().map(str::to_owned) else {
            return Err(AuthFailure::MissingRefreshToken);
        };
        let epoch = session.epoch;

        let result = self
            .api()
            .refresh_token(&refresh_token)
            .await
            .and_then(TokenPair::validated);

        match result {
            Ok(tokens) => {
                let access_token = tokens.access_token.clone();
                {
                    let _guard = self.write_guard();
                    if self.store().epoch() != epoch {
                        debug!("Discarding refresh result for a previous session");
                        return Err(AuthFailure::Superseded);
                    }
                    self.cookies().write_auth_cookie(&access_token);
                    self.cache().set(access_token.as_str());
                    self.store().update_tokens(tokens);
                }
                self.confirm_cookie(AUTH_TOKEN_COOKIE, &access_token, epoch)
                    .await;
                debug!("Access token refreshed");
                self.emit(SessionEvent::TokensRefreshed);
                Ok(())
            }
            Err(e) => {
                if self.store().epoch() != epoch {
                    debug!(error = %e, "Ignoring refresh failure for a previous session");
                    return Err(AuthFailure::Superseded);
                }
                warn!(error = %e, "Token refresh failed, logging out");
                self.logout_with_redirect(None).await;
                Err(AuthFailure::SessionExpired)
            }
        }
    }

    /// Clear cookies, cache and store (in that order), then tell the server.
    ///
    /// Always ends with a `LoggedOut` event pointing at the login page.
    #[instrument(skip_all)]
    pub async fn logout(&self) {
        let token = self.bearer();
        self.logout_with_redirect(token).await;
    }

    async fn logout_with_redirect(&self, server_token: Option<String>) {
        {
            let _guard = self.write_guard();
            self.clear_local_session();
        }
        info!("Logged out");
        self.emit(SessionEvent::LoggedOut {
            redirect_to: Some(LOGIN_PATH.to_string()),
        });

        if let Some(token) = server_token {
            if let Err(e) = self.api().logout(Some(&token)).await {
                debug!(error = %e, "Server logout failed, local session already cleared");
            }
        }
    }

    /// Mint a fresh pair from a stored refresh token and re-establish the session.
    ///
    /// Failure clears the local session without redirecting.
    ///
    /// # Errors
    ///
    /// Returns the categorized failure.
    #[instrument(skip_all)]
    pub async fn restore_session(&self) -> Result<User, AuthFailure> {
        let _refreshing = self.refresh_guard().await;

        let session = self.session();
        let Some(refresh_token) = session.auth.refresh_token().map(str::to_owned) else {
            return Err(AuthFailure::MissingRefreshToken);
        };
        let epoch = session.epoch;

        let result = async {
            let tokens = self.api().refresh_token(&refresh_token).await?.validated()?;
            let user = self.api().me(&tokens.access_token).await?;
            Ok::<_, ApiError>((user, tokens))
        }
        .await;

        if self.store().epoch() != epoch {
            return Err(AuthFailure::Superseded);
        }

        match result {
            Ok((user, tokens)) => {
                self.establish(user.clone(), tokens).await;
                info!(user_id = %user.id, "Session restored");
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "Silent session restore failed");
                {
                    let _guard = self.write_guard();
                    self.clear_local_session();
                }
                self.emit(SessionEvent::LoggedOut { redirect_to: None });
                Err(AuthFailure::SessionExpired)
            }
        }
    }

    /// Apply a partial profile update to the signed-in user.
    ///
    /// # Errors
    ///
    /// `NotAuthenticated` without a session.
    pub fn update_profile(&self, patch: UserPatch) -> Result<(), AuthFailure> {
        if !self.session().is_authenticated() {
            return Err(AuthFailure::NotAuthenticated);
        }
        self.store().update_user(patch);
        Ok(())
    }

    /// Write cookie pair, cache and store, then confirm the cookies.
    async fn establish(&self, user: User, tokens: TokenPair) {
        let access_token = tokens.access_token.clone();
        let role = user.role;
        let epoch = {
            let _guard = self.write_guard();
            self.cookies().write_auth_cookie(&access_token);
            self.cookies().write_role_cookie(role);
            self.cache().set(access_token.as_str());
            self.store().login_success(user.clone(), tokens);
            self.store().epoch()
        };
        self.emit(SessionEvent::LoggedIn { user });

        let (token_write, role_write) = tokio::join!(
            self.confirm_cookie(AUTH_TOKEN_COOKIE, &access_token, epoch),
            self.confirm_cookie(USER_ROLE_COOKIE, role.as_str(), epoch),
        );
        if token_write == CookieWrite::Unconfirmed || role_write == CookieWrite::Unconfirmed {
            warn!("Session cookies unconfirmed, the reconciler will re-check them");
        }
    }

    /// Confirm a session cookie, rewriting it only while the session that
    /// wrote it is still current.
    ///
    /// A logout, a new login or a token rotation during the wait leaves the
    /// cookie alone.
    async fn confirm_cookie(&self, name: &str, value: &str, epoch: u64) -> CookieWrite {
        self.cookies()
            .confirm_with(name, value, || {
                let _guard = self.write_guard();
                let session = self.session();
                let current = session.is_authenticated()
                    && session.epoch == epoch
                    && (name != AUTH_TOKEN_COOKIE || session.auth.access_token() == Some(value));
                if current {
                    self.cookies().write_cookie(name, value);
                }
                current
            })
            .await
    }
}
