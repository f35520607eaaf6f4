//! Command implementations.

pub mod cart;
pub mod session;

use std::time::Duration;

use atelier_client::cart::CartError;
use atelier_client::config::{ClientConfig, ConfigError};
use atelier_client::session::{AuthFailure, NoticeLevel, SessionEvent};
use atelier_client::{AtelierClient, ClientError};
use thiserror::Error;
use tokio::sync::broadcast;

/// How long to wait for the cart coordinator before exiting.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("{0}")]
    Auth(#[from] AuthFailure),

    #[error("cart error: {0}")]
    Cart(#[from] CartError),

    #[error("invalid price {0:?}")]
    InvalidPrice(String),
}

/// Client plus the event receiver opened before any command runs.
pub struct Connected {
    pub client: AtelierClient,
    events: broadcast::Receiver<SessionEvent>,
}

impl std::ops::Deref for Connected {
    type Target = AtelierClient;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Build and start a client from the environment.
pub async fn connect() -> Result<Connected, CliError> {
    let config = ClientConfig::from_env()?;
    let client = AtelierClient::from_config(&config)?;
    let events = client.session().events();
    client.start().await;
    Ok(Connected {
        client,
        events,
    })
}

/// Let background work settle, print notices and stop the watchers.
#[allow(clippy::print_stdout)]
pub async fn finish(mut connected: Connected) {
    if !connected.cart().wait_settled(SETTLE_TIMEOUT).await {
        tracing::warn!("Cart sync did not finish before exit");
    }
    connected.shutdown();

    while let Ok(event) = connected.events.try_recv() {
        match event {
            SessionEvent::Notice { level, message } => {
                let marker = match level {
                    NoticeLevel::Info => "i",
                    NoticeLevel::Success => "✓",
                    NoticeLevel::Error => "✗",
                };
                println!("{marker} {message}");
            }
            SessionEvent::SessionMismatch => {
                println!("✗ Session cookie was missing, you have been logged out");
            }
            _ => {}
        }
    }
}
