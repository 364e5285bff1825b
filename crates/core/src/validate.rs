// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Boundary validators for strings that cross `exec` seams.
//!
//! Every hostname, branch, container name, and signal is checked here
//! before it is spliced into a subprocess argv. Rejection is fatal for
//! the caller; nothing is ever sanitized or rewritten.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

/// Characters that are never allowed in an exec-bound string.
const SHELL_META: &[char] = &[
    ';', '&', '|', '$', '`', '(', ')', '{', '}', '<', '>', '\\', '\n', '\r', '\'', '"',
];

// Allow expect here as the regexes are compile-time verified to be valid
#[allow(clippy::expect_used)]
static HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_-]+@)?[A-Za-z0-9.-]+$").expect("constant regex pattern is valid")
});

#[allow(clippy::expect_used)]
static BRANCH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_/.-]+$").expect("constant regex pattern is valid"));

#[allow(clippy::expect_used)]
static CONTAINER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("constant regex pattern is valid")
});

/// Signals a caller may deliver to a container.
const SIGNAL_ALLOWLIST: &[&str] = &["SIGHUP", "SIGTERM", "SIGKILL", "SIGUSR1", "SIGUSR2"];

/// Validation failures. The `what` field names the rejected input class
/// so errors stay actionable without echoing more than the raw value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidateError {
    #[error("{what} must not be empty")]
    Empty { what: &'static str },

    #[error("{what} must not start with '-': {value:?}")]
    LeadingDash { what: &'static str, value: String },

    #[error("{what} contains shell metacharacters: {value:?}")]
    ShellMeta { what: &'static str, value: String },

    #[error("{what} has invalid format: {value:?}")]
    Format { what: &'static str, value: String },

    #[error("signal not in allowlist (SIGHUP, SIGTERM, SIGKILL, SIGUSR1, SIGUSR2): {value:?}")]
    UnknownSignal { value: String },
}

fn check_common(what: &'static str, value: &str) -> Result<(), ValidateError> {
    if value.is_empty() {
        return Err(ValidateError::Empty { what });
    }
    if value.starts_with('-') {
        return Err(ValidateError::LeadingDash { what, value: value.to_string() });
    }
    if value.contains(SHELL_META) {
        return Err(ValidateError::ShellMeta { what, value: value.to_string() });
    }
    Ok(())
}

/// Validate an SSH destination of the form `[user@]host`.
pub fn validate_host(value: &str) -> Result<(), ValidateError> {
    check_common("host", value)?;
    if !HOST_PATTERN.is_match(value) {
        return Err(ValidateError::Format { what: "host", value: value.to_string() });
    }
    Ok(())
}

/// Validate a git branch name.
pub fn validate_branch(value: &str) -> Result<(), ValidateError> {
    check_common("branch", value)?;
    if !BRANCH_PATTERN.is_match(value) {
        return Err(ValidateError::Format { what: "branch", value: value.to_string() });
    }
    Ok(())
}

/// Validate a container name.
pub fn validate_container(value: &str) -> Result<(), ValidateError> {
    check_common("container name", value)?;
    if !CONTAINER_PATTERN.is_match(value) {
        return Err(ValidateError::Format { what: "container name", value: value.to_string() });
    }
    Ok(())
}

/// Validate a signal name against the fixed allowlist.
///
/// Accepts the name with or without the `SIG` prefix, case-insensitively,
/// and returns the canonical `SIGXXX` form for use in argv.
pub fn validate_signal(value: &str) -> Result<&'static str, ValidateError> {
    if value.is_empty() {
        return Err(ValidateError::Empty { what: "signal" });
    }
    let upper = value.to_ascii_uppercase();
    let canonical =
        if upper.starts_with("SIG") { upper.clone() } else { format!("SIG{upper}") };
    SIGNAL_ALLOWLIST
        .iter()
        .find(|s| **s == canonical)
        .copied()
        .ok_or(ValidateError::UnknownSignal { value: value.to_string() })
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
