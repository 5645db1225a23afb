//! Lenient recovery of structured JSON from free-form model replies.
//!
//! Two tiers are attempted in order:
//!
//! 1. **Direct**: the whole (trimmed) reply parses as `T`.
//! 2. **Extracted**: the first `[ { … } ]`-shaped substring parses as `T`.
//!    The opening `[ {` is the first one in the reply. One value is read
//!    from there and whatever follows is ignored; if that fails, at most
//!    [`MAX_CLOSE_CANDIDATES`] closing `} ]` positions are tried from the
//!    last one backwards.
//!
//! [`parse_lenient`] surfaces a failure of both tiers as
//! [`AgencyError::Planning`]; [`parse_lenient_or`] substitutes a caller
//! supplied default instead.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::{AgencyError, Result};

static ARRAY_START: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[\s*\{").unwrap());
static ARRAY_END: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\}\s*\]").unwrap());

/// Closing positions re-parsed when reading a single value fails. Keeps
/// replies with many `} ]` sequences linear.
pub const MAX_CLOSE_CANDIDATES: usize = 8;

/// Which tier produced a parsed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParseTier {
    /// The full reply was valid JSON.
    Direct,
    /// JSON was cut out of surrounding prose.
    Extracted,
    /// Neither tier worked and the caller's default was used.
    Fallback,
}

impl ParseTier {
    /// Lowercase label for logs and event payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Extracted => "extracted",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for ParseTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed value tagged with the tier that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Parsed<T> {
    /// The decoded value.
    pub value: T,
    /// How it was obtained.
    pub tier: ParseTier,
}

/// Parse `text` with both tiers; fail with [`AgencyError::Planning`] if
/// neither yields a `T`.
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Result<Parsed<T>> {
    try_tiers(text).map_err(|reason| {
        AgencyError::Planning(format!(
            "could not recover structured output ({reason}): {}",
            preview(text, 200)
        ))
    })
}

/// Parse `text` with both tiers; use `fallback` if neither yields a `T`.
pub fn parse_lenient_or<T, F>(text: &str, fallback: F) -> Parsed<T>
where
    T: DeserializeOwned,
    F: FnOnce() -> T,
{
    match try_tiers(text) {
        Ok(parsed) => parsed,
        Err(reason) => {
            debug!(reason = %reason, "structured output unrecoverable, using fallback");
            Parsed {
                value: fallback(),
                tier: ParseTier::Fallback,
            }
        }
    }
}

fn try_tiers<T: DeserializeOwned>(text: &str) -> std::result::Result<Parsed<T>, String> {
    let direct_err = match serde_json::from_str::<T>(text.trim()) {
        Ok(value) => {
            return Ok(Parsed {
                value,
                tier: ParseTier::Direct,
            });
        }
        Err(e) => e,
    };

    let Some(start) = ARRAY_START.find(text) else {
        return Err(format!("direct parse failed ({direct_err}) and no array found"));
    };

    let tail = &text[start.start()..];
    if let Some(Ok(value)) = serde_json::Deserializer::from_str(tail).into_iter::<T>().next() {
        return Ok(Parsed {
            value,
            tier: ParseTier::Extracted,
        });
    }

    let ends: Vec<usize> = ARRAY_END
        .find_iter(tail)
        .map(|m| start.start() + m.end())
        .collect();

    for end in ends.into_iter().rev().take(MAX_CLOSE_CANDIDATES) {
        if let Ok(value) = serde_json::from_str::<T>(&text[start.start()..end]) {
            return Ok(Parsed {
                value,
                tier: ParseTier::Extracted,
            });
        }
    }

    Err(format!("direct parse failed ({direct_err}) and extracted array did not parse"))
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        name: String,
    }

    #[test]
    fn direct_tier() {
        let parsed: Parsed<Vec<Item>> = parse_lenient(r#" [{"name": "a"}, {"name": "b"}] "#).unwrap();
        assert_eq!(parsed.tier, ParseTier::Direct);
        assert_eq!(parsed.value.len(), 2);
    }

    #[test]
    fn extracted_tier_skips_preamble_and_trailer() {
        let text = "Sure! Here is the plan:\n```json\n[{\"name\": \"a\"}]\n```\nLet me know.";
        let parsed: Parsed<Vec<Item>> = parse_lenient(text).unwrap();
        assert_eq!(parsed.tier, ParseTier::Extracted);
        assert_eq!(parsed.value, vec![Item { name: "a".into() }]);
    }

    #[test]
    fn extracted_tier_backs_off_to_earlier_close() {
        let text = r#"Plan: [{"name": "a"}] (see also {note} ] for details)"#;
        let parsed: Parsed<Vec<Item>> = parse_lenient(text).unwrap();
        assert_eq!(parsed.tier, ParseTier::Extracted);
        assert_eq!(parsed.value.len(), 1);
    }

    #[test]
    fn extracted_tier_ignores_many_trailing_closers() {
        let mut text = String::from(r#"Plan: [{"name": "a"}]"#);
        for _ in 0..5000 {
            text.push_str(" } ]");
        }
        let parsed: Parsed<Vec<Item>> = parse_lenient(&text).unwrap();
        assert_eq!(parsed.tier, ParseTier::Extracted);
        assert_eq!(parsed.value, vec![Item { name: "a".into() }]);
    }

    #[test]
    fn unclosed_array_with_many_closers_fails() {
        let mut text = String::from(r#"Plan: [{"name": "#);
        for _ in 0..5000 {
            text.push_str("} ]");
        }
        let result: Result<Parsed<Vec<Item>>> = parse_lenient(&text);
        assert_matches!(result, Err(AgencyError::Planning(_)));
    }

    #[test]
    fn prose_without_array_fails() {
        let result: Result<Parsed<Vec<Item>>> = parse_lenient("I cannot help with that.");
        assert_matches!(result, Err(AgencyError::Planning(_)));
    }

    #[test]
    fn fallback_used_when_both_tiers_fail() {
        let parsed = parse_lenient_or("no json here", || vec![Item { name: "default".into() }]);
        assert_eq!(parsed.tier, ParseTier::Fallback);
        assert_eq!(parsed.value[0].name, "default");
    }

    #[test]
    fn fallback_not_used_when_parse_succeeds() {
        let parsed = parse_lenient_or(r#"[{"name": "x"}]"#, Vec::<Item>::new);
        assert_eq!(parsed.tier, ParseTier::Direct);
        assert_eq!(parsed.value.len(), 1);
    }

    #[test]
    fn tier_labels() {
        assert_eq!(ParseTier::Extracted.to_string(), "extracted");
    }
}
