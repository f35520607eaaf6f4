//! `reqwest` implementation of [`RemoteApi`].

use std::sync::Arc;

use async_trait::async_trait;
use atelier_core::{Email, User};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};
use url::Url;

use super::types::{
    CartItemInput, Envelope, LoginPayload, MeResponse, RefreshResponse, ServerCart,
    SignupPayload, SignupRequest, TokenPair,
};
use super::{ApiError, RemoteApi};
use crate::config::ClientConfig;

/// Maximum number of body characters kept in diagnostics.
const BODY_SNIPPET_LEN: usize = 200;

/// HTTP client for the remote storefront API.
#[derive(Clone)]
pub struct HttpApi {
    inner: Arc<HttpApiInner>,
}

struct HttpApiInner {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpApi {
    /// Create a new client from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;

        Ok(Self {
            inner: Arc::new(HttpApiInner {
                client,
                base_url: config.api_url.clone(),
            }),
        })
    }

    /// Base URL all endpoints are joined to.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    fn request(&self, method: Method, path: &str, bearer: Option<&str>) -> Result<RequestBuilder, ApiError> {
        let url = self
            .inner
            .base_url
            .join(path)
            .map_err(|e| ApiError::Malformed(format!("invalid endpoint {path}: {e}")))?;

        let builder = self.inner.client.request(method, url);
        Ok(match bearer {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        })
    }

    /// Send a request and read the status and body text.
    async fn send(&self, builder: RequestBuilder) -> Result<(StatusCode, String), ApiError> {
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Send a request whose response uses the standard envelope.
    async fn send_envelope<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
    ) -> Result<T, ApiError> {
        let (status, body) = self.send(builder).await?;

        match serde_json::from_str::<Envelope<T>>(&body) {
            Ok(envelope) => envelope.into_result(status.as_u16()),
            Err(e) if status.is_success() => {
                warn!(error = %e, "Response did not match the envelope contract");
                Err(ApiError::Malformed(e.to_string()))
            }
            Err(_) => Err(status_error(status, &body)),
        }
    }

    /// Send a request whose response is a bare JSON document.
    async fn send_bare<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ApiError> {
        let (status, body) = self.send(builder).await?;

        if !status.is_success() {
            // Error bodies still use the envelope shape when the server produced them
            return Err(
                match serde_json::from_str::<Envelope<serde_json::Value>>(&body) {
                    Ok(envelope) => match envelope.into_result(status.as_u16()) {
                        Err(err) => err,
                        Ok(_) => status_error(status, &body),
                    },
                    Err(_) => status_error(status, &body),
                },
            );
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

fn status_error(status: StatusCode, body: &str) -> ApiError {
    ApiError::Status {
        status: status.as_u16(),
        body: body.chars().take(BODY_SNIPPET_LEN).collect(),
    }
}

#[async_trait]
impl RemoteApi for HttpApi {
    #[instrument(skip_all, fields(email = %email))]
    async fn login(&self, email: &Email, password: &SecretString) -> Result<LoginPayload, ApiError> {
        let body = serde_json::json!({
            "email": email,
            "password": password.expose_secret(),
        });
        let payload: LoginPayload = self
            .send_envelope(self.request(Method::POST, "auth/login", None)?.json(&body))
            .await?;
        payload.tokens.clone().validated()?;
        Ok(payload)
    }

    #[instrument(skip_all, fields(email = %request.email))]
    async fn signup(&self, request: &SignupRequest) -> Result<User, ApiError> {
        let mut body =
            serde_json::to_value(request).map_err(|e| ApiError::Malformed(e.to_string()))?;
        if let Some(fields) = body.as_object_mut() {
            fields.insert(
                "password".to_string(),
                serde_json::Value::String(request.password.expose_secret().to_string()),
            );
        }
        let payload: SignupPayload = self
            .send_envelope(self.request(Method::POST, "auth/signup", None)?.json(&body))
            .await?;
        Ok(payload.user)
    }

    #[instrument(skip_all)]
    async fn me(&self, access_token: &str) -> Result<User, ApiError> {
        let body: MeResponse = self
            .send_bare(self.request(Method::GET, "auth/me", Some(access_token))?)
            .await?;
        Ok(body.user)
    }

    #[instrument(skip_all)]
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let body = serde_json::json!({ "refreshToken": refresh_token });
        let response: RefreshResponse = self
            .send_bare(
                self.request(Method::POST, "auth/refresh-token", None)?
                    .json(&body),
            )
            .await?;
        response.data.validated()
    }

    #[instrument(skip_all)]
    async fn logout(&self, access_token: Option<&str>) -> Result<(), ApiError> {
        let (status, body) = self
            .send(self.request(Method::POST, "auth/logout", access_token)?)
            .await?;
        if status.is_success() {
            debug!("Server-side logout acknowledged");
            Ok(())
        } else {
            Err(status_error(status, &body))
        }
    }

    #[instrument(skip_all)]
    async fn get_cart(&self, access_token: &str) -> Result<ServerCart, ApiError> {
        self.send_envelope(self.request(Method::GET, "cart", Some(access_token))?)
            .await
    }

    #[instrument(skip_all, fields(lines = items.len()))]
    async fn merge_cart(
        &self,
        access_token: &str,
        items: &[CartItemInput],
    ) -> Result<ServerCart, ApiError> {
        let body = serde_json::json!({ "items": items });
        self.send_envelope(
            self.request(Method::POST, "cart/merge", Some(access_token))?
                .json(&body),
        )
        .await
    }

    #[instrument(skip_all, fields(product_id = %item.product_id))]
    async fn add_to_cart(
        &self,
        access_token: &str,
        item: &CartItemInput,
    ) -> Result<ServerCart, ApiError> {
        self.send_envelope(
            self.request(Method::POST, "cart/add", Some(access_token))?
                .json(item),
        )
        .await
    }
}
