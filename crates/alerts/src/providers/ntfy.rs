// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ntfy.sh topic push provider.

use async_trait::async_trait;

use keel_core::{Alert, Severity};

use super::{check_status, http_client, AlertProvider, ProviderError};

pub struct NtfyProvider {
    server: String,
    topic: String,
    client: reqwest::Client,
}

impl NtfyProvider {
    pub fn new(server: impl Into<String>, topic: impl Into<String>) -> Self {
        Self { server: server.into(), topic: topic.into(), client: http_client() }
    }
}

fn priority_for(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "default",
        Severity::Warning => "high",
        Severity::Error => "high",
        Severity::Critical => "urgent",
    }
}

#[async_trait]
impl AlertProvider for NtfyProvider {
    fn name(&self) -> &'static str {
        "ntfy"
    }

    fn is_configured(&self) -> bool {
        !self.server.is_empty() && !self.topic.is_empty()
    }

    async fn send(&self, alert: &Alert) -> Result<(), ProviderError> {
        let url = format!("{}/{}", self.server.trim_end_matches('/'), self.topic);
        let response = self
            .client
            .post(&url)
            .header("Title", alert.title.clone())
            .header("Priority", priority_for(alert.severity))
            .header("Tags", alert.severity.to_string())
            .body(alert.message.clone())
            .send()
            .await?;
        check_status(response).await
    }
}
