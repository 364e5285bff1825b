// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Generic webhook provider: POST the alert as JSON, HMAC-signed when a
//! shared secret is configured.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use keel_core::Alert;

use super::{check_status, http_client, AlertProvider, ProviderError};

type HmacSha256 = Hmac<Sha256>;

pub struct WebhookProvider {
    url: String,
    secret: Option<String>,
    client: reqwest::Client,
}

impl WebhookProvider {
    pub fn new(url: impl Into<String>, secret: Option<String>) -> Self {
        Self { url: url.into(), secret: secret.filter(|s| !s.is_empty()), client: http_client() }
    }
}

/// `sha256=<hex hmac>` over the exact body bytes sent.
pub(crate) fn signature_for(secret: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[async_trait]
impl AlertProvider for WebhookProvider {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }

    async fn send(&self, alert: &Alert) -> Result<(), ProviderError> {
        let body = serde_json::to_vec(alert).unwrap_or_default();
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body.clone());
        if let Some(secret) = &self.secret {
            if let Some(signature) = signature_for(secret, &body) {
                request = request.header("X-Keel-Signature", signature);
            }
        }
        let response = request.send().await?;
        check_status(response).await
    }
}
