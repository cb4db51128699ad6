//! Value normalization for trigger extraction and matching.

use std::sync::OnceLock;

use regex::Regex;

static WHITESPACE: OnceLock<Regex> = OnceLock::new();
static HONORIFIC: OnceLock<Regex> = OnceLock::new();

fn whitespace() -> &'static Regex {
    // `\s` is Unicode-aware, so the ideographic space (U+3000) is covered.
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("whitespace pattern is valid"))
}

fn honorific() -> &'static Regex {
    HONORIFIC.get_or_init(|| {
        Regex::new(r"(さん|さま|様|氏|くん|君|ちゃん)$").expect("honorific pattern is valid")
    })
}

/// Canonical comparison form: whitespace removed, lowercased.
#[must_use]
pub fn normalize_value(value: &str) -> String {
    whitespace().replace_all(value, "").to_lowercase()
}

/// Canonical comparison form for person names.
///
/// Like [`normalize_value`], with one trailing honorific stripped. A value
/// consisting only of an honorific is left as is.
#[must_use]
pub fn normalize_name(value: &str) -> String {
    let base = normalize_value(value);
    let stripped = honorific().replace(&base, "");
    if stripped.is_empty() {
        base
    } else {
        stripped.into_owned()
    }
}

/// Normalized entity key used for dedupe.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    normalize_value(key)
}
