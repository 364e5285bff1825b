// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Phone number normalization for text-message providers.

/// Normalize a phone number to `+`-prefixed E.164-ish form.
///
/// Digits-only input gets a `+` prepended; already-prefixed numbers are
/// unchanged; empty stays empty. Separators are stripped first.
pub fn format_phone(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return String::new();
    }
    format!("+{digits}")
}
