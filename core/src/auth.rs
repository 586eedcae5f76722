use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a token string.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a presented bearer token with the configured internal token.
///
/// Both sides are hashed first so the comparison time does not depend on
/// how many leading characters match.
pub fn token_matches(presented: &str, expected: &str) -> bool {
    let presented = presented.trim();
    if presented.is_empty() || expected.is_empty() {
        return false;
    }
    hash_token(presented) == hash_token(expected)
}

/// Strip the `Bearer ` scheme from an Authorization header value.
pub fn parse_bearer(header_value: &str) -> Option<&str> {
    let value = header_value.trim();
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() { None } else { Some(token) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_hex() {
        let hash = hash_token("secret");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hash_token("secret"));
        assert_ne!(hash, hash_token("secret2"));
    }

    #[test]
    fn token_matches_exact_value_only() {
        assert!(token_matches("dg_internal", "dg_internal"));
        assert!(token_matches("  dg_internal ", "dg_internal"));
        assert!(!token_matches("dg_internal_x", "dg_internal"));
        assert!(!token_matches("", "dg_internal"));
        assert!(!token_matches("anything", ""));
    }

    #[test]
    fn parse_bearer_accepts_case_insensitive_scheme() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("bearer   abc "), Some("abc"));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer("abc"), None);
    }
}
