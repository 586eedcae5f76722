//! Coarse textual filters applied to everything the gateway forwards upstream.
//!
//! None of these functions parse their input; they only drop, strip and
//! truncate. The allowlists are closed: anything not named is discarded.

use std::collections::BTreeMap;

/// Header the upstream ticketing API authenticates with.
pub const UPSTREAM_AUTH_HEADER: &str = "api_access_token";

/// Largest request body the gateway will forward.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

const MAX_HEADER_VALUE_CHARS: usize = 1000;
const MAX_QUERY_VALUE_CHARS: usize = 100;

const ALLOWED_HEADERS: &[&str] = &["content-type", "accept", "user-agent", UPSTREAM_AUTH_HEADER];

pub const ALLOWED_QUERY_PARAMS: &[&str] = &[
    "status",
    "inbox_id",
    "page",
    "limit",
    "assignee_id",
    "label_ids",
    "sort_by",
    "order",
    "since",
    "until",
];

const DANGEROUS_SCHEMES: &[&str] = &["javascript:", "data:"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanitizeError {
    #[error("request body of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
}

/// Keep only allowlisted headers, strip CR/LF and cap each value.
/// Header names come back lower-cased.
pub fn clean_headers<'a, I>(headers: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut cleaned = BTreeMap::new();
    for (name, value) in headers {
        let name = name.trim().to_ascii_lowercase();
        if !ALLOWED_HEADERS.contains(&name.as_str()) || value.is_empty() {
            continue;
        }
        let value: String = value
            .chars()
            .filter(|c| *c != '\r' && *c != '\n')
            .take(MAX_HEADER_VALUE_CHARS)
            .collect();
        cleaned.insert(name, value);
    }
    cleaned
}

/// Keep only allowlisted query parameters, strip markup and script schemes,
/// cap each value. A repeated key keeps its last value.
pub fn clean_query<'a, I>(params: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut cleaned = BTreeMap::new();
    for (name, value) in params {
        if !ALLOWED_QUERY_PARAMS.contains(&name) || value.is_empty() {
            continue;
        }
        let mut value: String = value.chars().filter(|c| *c != '<' && *c != '>').collect();
        for scheme in DANGEROUS_SCHEMES {
            value = remove_ascii_case_insensitive(&value, scheme);
        }
        let value: String = value.chars().take(MAX_QUERY_VALUE_CHARS).collect();
        cleaned.insert(name.to_string(), value);
    }
    cleaned
}

/// Reject oversized bodies, otherwise strip CR/LF and angle brackets.
pub fn clean_body(raw: &[u8]) -> Result<String, SanitizeError> {
    if raw.len() > MAX_BODY_BYTES {
        return Err(SanitizeError::PayloadTooLarge {
            size: raw.len(),
            limit: MAX_BODY_BYTES,
        });
    }
    Ok(String::from_utf8_lossy(raw)
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n' | '<' | '>'))
        .collect())
}

/// Remove every occurrence of an ASCII needle, ignoring case, until none
/// remains (so removals cannot splice a new occurrence together).
fn remove_ascii_case_insensitive(haystack: &str, needle: &str) -> String {
    let needle = needle.to_ascii_lowercase();
    let mut current = haystack.to_string();
    loop {
        let lowered = current.to_ascii_lowercase();
        let Some(start) = lowered.find(&needle) else {
            return current;
        };
        current.replace_range(start..start + needle.len(), "");
    }
}
