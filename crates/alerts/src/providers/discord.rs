// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Discord webhook provider.

use async_trait::async_trait;
use serde_json::{json, Value};

use keel_core::{Alert, Severity};

use super::{check_status, http_client, AlertProvider, ProviderError};

pub struct DiscordProvider {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordProvider {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self { webhook_url: webhook_url.into(), client: http_client() }
    }
}

fn color_for(severity: Severity) -> u32 {
    match severity {
        Severity::Info => 0x00ff00,
        Severity::Warning => 0xffaa00,
        Severity::Error => 0xff0000,
        Severity::Critical => 0x990000,
    }
}

pub(crate) fn discord_payload(alert: &Alert) -> Value {
    let fields: Vec<Value> = alert
        .metadata
        .iter()
        .map(|(k, v)| json!({"name": k, "value": v, "inline": true}))
        .collect();
    json!({
        "embeds": [{
            "title": alert.title,
            "description": alert.message,
            "color": color_for(alert.severity),
            "footer": {"text": alert.source},
            "fields": fields,
        }]
    })
}

#[async_trait]
impl AlertProvider for DiscordProvider {
    fn name(&self) -> &'static str {
        "discord"
    }

    fn is_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    async fn send(&self, alert: &Alert) -> Result<(), ProviderError> {
        let response =
            self.client.post(&self.webhook_url).json(&discord_payload(alert)).send().await?;
        check_status(response).await
    }
}
