// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert provider drivers.

mod callmebot;
mod discord;
mod ntfy;
mod slack;
mod webhook;

pub use callmebot::CallMeBotProvider;
pub use discord::DiscordProvider;
pub use ntfy::NtfyProvider;
pub use slack::SlackProvider;
pub use webhook::WebhookProvider;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use keel_core::Alert;

/// Per-request timeout shared by every provider.
pub(crate) const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
}

/// One notification channel.
///
/// `is_configured` gates registration: the manager drops providers that
/// return false, so `send` can assume its config is present.
#[async_trait]
pub trait AlertProvider: Send + Sync {
    fn name(&self) -> &'static str;
    fn is_configured(&self) -> bool;
    async fn send(&self, alert: &Alert) -> Result<(), ProviderError>;
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(SEND_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Map a non-2xx response into [`ProviderError::Status`].
pub(crate) async fn check_status(response: reqwest::Response) -> Result<(), ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status: status.as_u16(),
        body: keel_core::truncate(&body, 200),
    })
}
