// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Well-known alert constructors for reconcile lifecycle events.

use keel_core::{short, Alert, Severity};

/// A deploy landed: commit, subject line, and where it went.
pub fn deploy_success_alert(commit: &str, subject: &str, target: &str, source: &str) -> Alert {
    Alert::new(
        "Deploy Succeeded",
        format!("{} deployed to {}: {}", short(commit, 12), target, subject),
        Severity::Info,
        source,
    )
    .with_meta("commit", commit)
    .with_meta("target", target)
}

/// A deploy failed outright (no rollback was attempted or possible).
pub fn deploy_failure_alert(commit: &str, target: &str, error: &str, source: &str) -> Alert {
    Alert::new(
        "Deploy Failed",
        format!("{} failed on {}: {}", short(commit, 12), target, error),
        Severity::Error,
        source,
    )
    .with_meta("commit", commit)
    .with_meta("target", target)
}

/// A deploy failed but the previous configuration was restored.
pub fn deploy_rollback_alert(commit: &str, target: &str, error: &str, source: &str) -> Alert {
    Alert::new(
        "Deploy Failed (Rolled Back)",
        format!(
            "{} failed on {}, previous configuration restored: {}",
            short(commit, 12),
            target,
            error
        ),
        Severity::Warning,
        source,
    )
    .with_meta("commit", commit)
    .with_meta("target", target)
}

/// Rollback itself failed; the stack may be down.
pub fn rollback_failed_alert(commit: &str, target: &str, error: &str, source: &str) -> Alert {
    Alert::new(
        "Rollback Failed",
        format!(
            "{} failed on {} and rollback did not restore the stack. \
             Manual intervention required: {}",
            short(commit, 12),
            target,
            error
        ),
        Severity::Critical,
        source,
    )
    .with_meta("commit", commit)
    .with_meta("target", target)
}

/// Periodic health report with a severity-bucketed title.
pub fn health_report_alert(severity: Severity, message: &str, source: &str) -> Alert {
    let title = match severity {
        Severity::Info => "Health Check OK",
        Severity::Warning => "Health Check Degraded",
        Severity::Error => "Health Check Failing",
        Severity::Critical => "Health Check Critical",
    };
    Alert::new(title, message, severity, source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_info_with_commit_meta() {
        let alert =
            deploy_success_alert("abc123def4567890", "add plex", "root@tower", "webhook");
        assert_eq!(alert.severity, Severity::Info);
        assert!(alert.message.contains("abc123def456"));
        assert!(!alert.message.contains("abc123def4567890"));
        assert_eq!(alert.metadata["commit"], "abc123def4567890");
    }

    #[test]
    fn rollback_variants_have_distinct_severities() {
        let rolled = deploy_rollback_alert("abc", "tower", "unhealthy", "poll");
        assert_eq!(rolled.severity, Severity::Warning);

        let failed = rollback_failed_alert("abc", "tower", "unhealthy", "poll");
        assert_eq!(failed.severity, Severity::Critical);
        assert!(failed.message.contains("Manual intervention required"));
    }

    #[yare::parameterized(
        ok = { Severity::Info, "Health Check OK" },
        degraded = { Severity::Warning, "Health Check Degraded" },
        failing = { Severity::Error, "Health Check Failing" },
        critical = { Severity::Critical, "Health Check Critical" },
    )]
    fn health_title_buckets(severity: Severity, title: &str) {
        assert_eq!(health_report_alert(severity, "m", "health").title, title);
    }
}
