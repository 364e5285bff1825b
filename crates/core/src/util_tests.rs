// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn short_caps_length() {
    assert_eq!(short("abc123def456", 7), "abc123d");
    assert_eq!(short("abc", 7), "abc");
}

#[test]
fn truncate_exact_budget_with_ellipsis() {
    let long = "x".repeat(40);
    let cut = truncate(&long, 10);
    assert_eq!(cut.chars().count(), 10);
    assert!(cut.ends_with("..."));
}

#[test]
fn truncate_leaves_short_strings_alone() {
    assert_eq!(truncate("hello", 10), "hello");
    assert_eq!(truncate("hello", 5), "hello");
}

#[test]
fn truncate_tiny_budget_has_no_room_for_ellipsis() {
    assert_eq!(truncate("hello", 2), "he");
}

#[test]
fn truncate_bytes_respects_char_boundaries() {
    // Multi-byte char straddling the cut point is dropped entirely.
    let s = "ab\u{00e9}cd"; // e-acute is 2 bytes, starting at byte 2
    assert_eq!(truncate_bytes(s, 3), "ab");
    assert_eq!(truncate_bytes(s, 4), "ab\u{00e9}");
    assert_eq!(truncate_bytes("short", 500), "short");
}
