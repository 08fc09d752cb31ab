// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tool title sanitization.
//!
//! Downstream tool names may contain characters that are illegal as script
//! identifiers or path components. The sanitized title is what stub file
//! names, script identifiers, and user-facing tool paths use; the downstream
//! name stays verbatim on the wire.

use std::collections::HashSet;

/// Sanitize a downstream tool name into an identifier-safe title.
///
/// Every run of characters outside `[A-Za-z0-9_]` collapses to a single
/// `_`; a leading digit gets a `_` prepended. Idempotent.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    let mut in_run = false;

    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }

    if out.is_empty() {
        out.push('_');
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }

    out
}

/// Sanitize a name and make the result unique against already-taken titles
/// by appending `_2`, `_3`, ... as needed.
pub fn unique_title(name: &str, taken: &HashSet<String>) -> String {
    let base = sanitize(name);
    if !taken.contains(&base) {
        return base;
    }

    let mut n = 2u32;
    loop {
        let candidate = format!("{}_{}", base, n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
