// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Alert value type fanned out to notification providers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Alert severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A single notification event. Immutable after construction; providers
/// receive a shared reference and must not need anything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    /// Origin tag (`"webhook"`, `"poll"`, a trigger source, ...).
    pub source: String,
    /// Free-form key/value context, rendered as fields by providers.
    pub metadata: BTreeMap<String, String>,
}

impl Alert {
    pub fn new(
        title: impl Into<String>,
        message: impl Into<String>,
        severity: Severity,
        source: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            source: source.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach one metadata field (builder-style, used at construction only).
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
#[path = "alert_tests.rs"]
mod tests;
