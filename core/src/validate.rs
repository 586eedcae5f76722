use std::sync::LazyLock;

use regex::Regex;

/// Opaque identifiers (tenant ids, agent ids, tenant config keys): UUIDs or
/// short slugs. Never contains path separators.
pub fn is_identifier(value: &str) -> bool {
    static IDENTIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("identifier regex must compile")
    });
    IDENTIFIER_RE.is_match(value)
}

pub fn is_email(value: &str) -> bool {
    static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$")
            .expect("email regex must compile")
    });
    value.len() <= 254 && EMAIL_RE.is_match(value)
}
