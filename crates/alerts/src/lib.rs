// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! keel-alerts: multi-channel alert fan-out.
//!
//! Providers are cheap façades over HTTP endpoints (Slack, Discord,
//! ntfy, generic webhooks, CallMeBot). The manager keeps only the
//! configured ones and isolates each provider's failure from the rest.

pub mod lifecycle;
pub mod manager;
pub mod phone;
pub mod providers;

pub use lifecycle::{
    deploy_failure_alert, deploy_rollback_alert, deploy_success_alert, health_report_alert,
    rollback_failed_alert,
};
pub use manager::{AlertManager, SendErrors};
pub use phone::format_phone;
pub use providers::{AlertProvider, ProviderError};
