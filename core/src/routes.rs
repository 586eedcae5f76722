//! Allowlist of upstream routes the gateway may reach.
//!
//! Patterns are a small AST (literal / wildcard / numeric id segments) built
//! once at startup. Matching is a linear scan; the first matching pattern
//! wins, so more specific patterns must come before general ones.

use std::fmt;

const MAX_PATH_CHARS: usize = 500;

const DANGEROUS_SUBSTRINGS: &[&str] = &["..", "//", "<", ">", "javascript:", "data:", "file:", "ftp:"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Any single non-empty segment.
    Wildcard,
    /// A single segment of ASCII digits.
    NumericId,
}

impl Segment {
    pub fn literal(value: &str) -> Self {
        Segment::Literal(value.to_ascii_lowercase())
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            Segment::Literal(expected) => expected == candidate,
            Segment::Wildcard => !candidate.is_empty(),
            Segment::NumericId => {
                !candidate.is_empty() && candidate.bytes().all(|b| b.is_ascii_digit())
            }
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Literal(value) => f.write_str(value),
            Segment::Wildcard => f.write_str("*"),
            Segment::NumericId => f.write_str(":id"),
        }
    }
}

/// Rate-limit bucket a route belongs to. Limits per class come from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateClass {
    Standard,
    Messages,
}

impl RateClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RateClass::Standard => "standard",
            RateClass::Messages => "messages",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    segments: Vec<Segment>,
    methods: Vec<String>,
    rate_class: RateClass,
}

impl RoutePattern {
    pub fn new(segments: Vec<Segment>, methods: &[&str], rate_class: RateClass) -> Self {
        Self {
            segments,
            methods: methods.iter().map(|m| m.to_ascii_uppercase()).collect(),
            rate_class,
        }
    }

    pub fn template(&self) -> String {
        self.segments
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn rate_class(&self) -> RateClass {
        self.rate_class
    }

    fn matches(&self, parts: &[&str]) -> bool {
        self.segments.len() == parts.len()
            && self
                .segments
                .iter()
                .zip(parts)
                .all(|(segment, part)| segment.matches(part))
    }

    fn permits(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    /// Lower-cased path without trailing slashes.
    pub normalized_path: String,
    pub allowed_methods: Vec<String>,
    pub rate_class: RateClass,
    pub template: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteRejection {
    EmptyPath,
    InvalidFormat,
    DangerousPattern,
    NotAllowlisted,
}

impl RouteRejection {
    pub fn reason(self) -> &'static str {
        match self {
            RouteRejection::EmptyPath => "Empty path not allowed",
            RouteRejection::InvalidFormat => "Invalid path format",
            RouteRejection::DangerousPattern => "Dangerous pattern detected",
            RouteRejection::NotAllowlisted => "Path not in allowlist",
        }
    }
}

impl fmt::Display for RouteRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

#[derive(Debug, Clone)]
pub struct RouteAuthorizer {
    patterns: Vec<RoutePattern>,
}

impl RouteAuthorizer {
    pub fn new(patterns: Vec<RoutePattern>) -> Self {
        Self { patterns }
    }

    /// The ticketing API surface exposed to the dashboard.
    pub fn ticketing() -> Self {
        use RateClass::{Messages, Standard};
        use Segment::NumericId;
        let lit = Segment::literal;

        Self::new(vec![
            RoutePattern::new(vec![lit("conversations")], &["GET", "POST"], Standard),
            RoutePattern::new(
                vec![lit("conversations"), lit("messages")],
                &["GET"],
                Messages,
            ),
            RoutePattern::new(
                vec![lit("conversations"), NumericId, lit("messages")],
                &["GET", "POST"],
                Messages,
            ),
            RoutePattern::new(vec![lit("inboxes")], &["GET"], Standard),
            RoutePattern::new(vec![lit("contacts")], &["GET"], Standard),
            RoutePattern::new(vec![lit("contacts"), NumericId], &["GET"], Standard),
            RoutePattern::new(vec![lit("reports"), lit("summary")], &["GET"], Standard),
            RoutePattern::new(vec![lit("reports"), lit("agents")], &["GET"], Standard),
            RoutePattern::new(vec![lit("reports"), lit("conversations")], &["GET"], Standard),
            RoutePattern::new(vec![lit("reports"), lit("inboxes")], &["GET"], Standard),
            RoutePattern::new(vec![lit("labels")], &["GET"], Standard),
            RoutePattern::new(vec![lit("teams")], &["GET"], Standard),
            RoutePattern::new(vec![lit("canned_responses")], &["GET"], Standard),
            RoutePattern::new(vec![lit("canned_responses"), NumericId], &["GET"], Standard),
            RoutePattern::new(vec![lit("account")], &["GET"], Standard),
        ])
    }

    pub fn patterns(&self) -> &[RoutePattern] {
        &self.patterns
    }

    pub fn templates(&self) -> Vec<String> {
        self.patterns.iter().map(RoutePattern::template).collect()
    }

    /// Validate a request path given as segments.
    pub fn authorize<S: AsRef<str>>(&self, segments: &[S]) -> Result<RouteMatch, RouteRejection> {
        if segments.is_empty() || segments.iter().all(|s| s.as_ref().is_empty()) {
            return Err(RouteRejection::EmptyPath);
        }
        let raw = segments
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("/");
        if raw.chars().count() > MAX_PATH_CHARS {
            return Err(RouteRejection::InvalidFormat);
        }

        let lowered = raw.to_lowercase();
        if DANGEROUS_SUBSTRINGS.iter().any(|d| lowered.contains(d)) {
            return Err(RouteRejection::DangerousPattern);
        }

        let normalized = normalize(&raw);
        let pattern = self
            .find(&normalized)
            .ok_or(RouteRejection::NotAllowlisted)?;

        Ok(RouteMatch {
            normalized_path: normalized,
            allowed_methods: pattern.methods.clone(),
            rate_class: pattern.rate_class,
            template: pattern.template(),
        })
    }

    /// Re-run matching for `path` and report whether `method` is permitted
    /// by the first matching pattern.
    pub fn check_method(&self, path: &str, method: &str) -> bool {
        self.find(&normalize(path))
            .is_some_and(|pattern| pattern.permits(method))
    }

    fn find(&self, normalized: &str) -> Option<&RoutePattern> {
        let parts: Vec<&str> = normalized.split('/').collect();
        self.patterns.iter().find(|pattern| pattern.matches(&parts))
    }
}

fn normalize(path: &str) -> String {
    path.trim_end_matches('/').to_lowercase()
}
