// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CallMeBot WhatsApp text provider, for critical pages.

use async_trait::async_trait;

use keel_core::{Alert, Severity};

use super::{check_status, http_client, AlertProvider, ProviderError};
use crate::phone::format_phone;

const API_URL: &str = "https://api.callmebot.com/whatsapp.php";

pub struct CallMeBotProvider {
    phone: String,
    api_key: String,
    client: reqwest::Client,
}

impl CallMeBotProvider {
    pub fn new(phone: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { phone: format_phone(&phone.into()), api_key: api_key.into(), client: http_client() }
    }
}

#[async_trait]
impl AlertProvider for CallMeBotProvider {
    fn name(&self) -> &'static str {
        "callmebot"
    }

    fn is_configured(&self) -> bool {
        !self.phone.is_empty() && !self.api_key.is_empty()
    }

    async fn send(&self, alert: &Alert) -> Result<(), ProviderError> {
        // Texts are reserved for operator-grade noise.
        if alert.severity < Severity::Error {
            return Ok(());
        }
        let text = format!("{}: {}", alert.title, alert.message);
        let response = self
            .client
            .get(API_URL)
            .query(&[("phone", self.phone.as_str()), ("text", &text), ("apikey", &self.api_key)])
            .send()
            .await?;
        check_status(response).await
    }
}
