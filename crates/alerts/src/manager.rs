// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert fan-out with per-provider error isolation.

use std::fmt;

use tracing::{debug, warn};

use keel_core::Alert;

use crate::providers::{AlertProvider, ProviderError};

/// Errors accumulated across providers during one fan-out.
///
/// One failing provider never stops the others; everything that failed
/// is joined here.
#[derive(Debug)]
pub struct SendErrors(pub Vec<(String, ProviderError)>);

impl fmt::Display for SendErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<String> =
            self.0.iter().map(|(name, err)| format!("{name}: {err}")).collect();
        write!(f, "{}", joined.join("; "))
    }
}

impl std::error::Error for SendErrors {}

/// Owns the configured providers and fans alerts out to all of them.
pub struct AlertManager {
    providers: Vec<Box<dyn AlertProvider>>,
}

impl AlertManager {
    /// Keep only the providers that report themselves configured.
    pub fn new(candidates: Vec<Box<dyn AlertProvider>>) -> Self {
        let providers: Vec<Box<dyn AlertProvider>> =
            candidates.into_iter().filter(|p| p.is_configured()).collect();
        debug!(
            providers = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "alert providers registered"
        );
        Self { providers }
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Send to every provider; collect failures instead of short-circuiting.
    pub async fn send(&self, alert: &Alert) -> Result<(), SendErrors> {
        let mut failures = Vec::new();
        for provider in &self.providers {
            if let Err(err) = provider.send(alert).await {
                warn!(provider = provider.name(), error = %err, "alert delivery failed");
                failures.push((provider.name().to_string(), err));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(SendErrors(failures))
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
