// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Slack incoming-webhook provider.

use async_trait::async_trait;
use serde_json::{json, Value};

use keel_core::{Alert, Severity};

use super::{check_status, http_client, AlertProvider, ProviderError};

pub struct SlackProvider {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackProvider {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self { webhook_url: webhook_url.into(), client: http_client() }
    }
}

fn color_for(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "good",
        Severity::Warning => "warning",
        Severity::Error | Severity::Critical => "danger",
    }
}

/// Attachment payload with one short field per metadata entry.
pub(crate) fn slack_payload(alert: &Alert) -> Value {
    let fields: Vec<Value> = alert
        .metadata
        .iter()
        .map(|(k, v)| json!({"title": k, "value": v, "short": true}))
        .collect();
    json!({
        "attachments": [{
            "color": color_for(alert.severity),
            "title": alert.title,
            "text": alert.message,
            "footer": alert.source,
            "fields": fields,
        }]
    })
}

#[async_trait]
impl AlertProvider for SlackProvider {
    fn name(&self) -> &'static str {
        "slack"
    }

    fn is_configured(&self) -> bool {
        !self.webhook_url.is_empty()
    }

    async fn send(&self, alert: &Alert) -> Result<(), ProviderError> {
        let response =
            self.client.post(&self.webhook_url).json(&slack_payload(alert)).send().await?;
        check_status(response).await
    }
}
