//! Request patterns: one anchored regex per request field.

use crate::field::PatternField;
use crate::message::Request;

/// Characters with a meaning in regex syntax that captured text may contain.
const META_CHARACTERS: &[char] = &[
    '\\', '*', '+', '[', ']', '(', ')', '{', '}', '$', '.', '?', '^', '|',
];

/// Eight regex sources, in tree order, plus the request they were captured
/// from. The original request is kept for display and never matched against.
#[derive(Debug, Clone, Default)]
pub struct RequestPattern {
    fields: [String; 8],
    original: Option<Request>,
}

impl RequestPattern {
    /// Pattern from regex sources given in tree order.
    pub fn new(fields: [String; 8]) -> Self {
        Self {
            fields,
            original: None,
        }
    }

    /// Pattern that matches exactly the literal values of `request`.
    pub fn from_request(request: &Request) -> Self {
        let fields = PatternField::ALL.map(|field| anchor(&escape(field.value(request))));
        Self {
            fields,
            original: Some(request.clone()),
        }
    }

    /// Regex source of one field.
    pub fn get(&self, field: PatternField) -> &str {
        &self.fields[field.index()]
    }

    /// Replace the regex source of one field.
    pub fn set(&mut self, field: PatternField, pattern: impl Into<String>) {
        self.fields[field.index()] = pattern.into();
    }

    /// Builder form of [`Self::set`].
    pub fn with(mut self, field: PatternField, pattern: impl Into<String>) -> Self {
        self.set(field, pattern);
        self
    }

    /// Field sources in tree order.
    pub fn sources(&self) -> impl Iterator<Item = (PatternField, &str)> {
        PatternField::ALL
            .into_iter()
            .map(move |field| (field, self.get(field)))
    }

    /// Request this pattern was captured from, if any.
    pub fn original(&self) -> Option<&Request> {
        self.original.as_ref()
    }

    /// Attach or drop the captured request.
    pub fn set_original(&mut self, original: Option<Request>) {
        self.original = original;
    }

    /// Combined length of all sources. Longer patterns are taken as more
    /// specific when several recordings match.
    pub fn total_len(&self) -> usize {
        self.fields.iter().map(String::len).sum()
    }
}

/// Equal when all eight sources are byte-identical.
impl PartialEq for RequestPattern {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl Eq for RequestPattern {}

/// Backslash-escape regex metacharacters.
pub fn escape(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    for c in literal.chars() {
        if META_CHARACTERS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Undo [`escape`].
pub fn unescape(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

/// Wrap in `^` and `$`.
pub fn anchor(pattern: &str) -> String {
    format!("^{pattern}$")
}

/// Drop one leading `^` and one trailing unescaped `$`.
pub fn strip_anchors(pattern: &str) -> &str {
    let pattern = pattern.strip_prefix('^').unwrap_or(pattern);
    match pattern.strip_suffix('$') {
        Some(rest) if !rest.ends_with('\\') || rest.ends_with("\\\\") => rest,
        _ => pattern,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_metacharacters() {
        assert_eq!(escape("a.b"), r"a\.b");
        assert_eq!(escape("/x?y=(1)"), r"/x\?y=\(1\)");
        assert_eq!(escape(r"c:\dir"), r"c:\\dir");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_from_request_anchors_every_field() {
        let request = Request::builder()
            .host("example.com")
            .path("/x")
            .query("a=1&b=[2]")
            .build();
        let pattern = RequestPattern::from_request(&request);
        assert_eq!(pattern.get(PatternField::Protocol), "^http$");
        assert_eq!(pattern.get(PatternField::Host), r"^example\.com$");
        assert_eq!(pattern.get(PatternField::Port), "^80$");
        assert_eq!(pattern.get(PatternField::Path), "^/x$");
        assert_eq!(pattern.get(PatternField::Query), r"^a=1&b=\[2\]$");
        assert_eq!(pattern.get(PatternField::Method), "^GET$");
        assert_eq!(pattern.get(PatternField::Header), "^$");
        assert_eq!(pattern.original(), Some(&request));
    }

    #[test]
    fn test_pattern_equality_ignores_original() {
        let request = Request::builder().path("/x").build();
        let mut a = RequestPattern::from_request(&request);
        let b = RequestPattern::from_request(&request);
        a.set_original(None);
        assert_eq!(a, b);
        assert_ne!(a, b.with(PatternField::Path, "^/y$"));
    }

    #[test]
    fn test_total_len() {
        let pattern = RequestPattern::default()
            .with(PatternField::Host, "^a$")
            .with(PatternField::Header, "x");
        assert_eq!(pattern.total_len(), 4);
    }

    #[test]
    fn test_strip_anchors() {
        assert_eq!(strip_anchors("^/x$"), "/x");
        assert_eq!(strip_anchors(r"^/x\$"), r"/x\$");
        assert_eq!(strip_anchors("/x"), "/x");
    }

    #[test]
    fn test_escaped_pattern_matches_literal() {
        let literal = "GET /a+b?(c)|[d]{e}^$.*";
        let regex = regex::Regex::new(&anchor(&escape(literal))).unwrap();
        assert!(regex.is_match(literal));
        assert!(!regex.is_match("GET /aab?(c)|[d]{e}^$.*"));
    }

    proptest! {
        #[test]
        fn prop_escape_round_trip(literal in ".*") {
            let escaped = escape(&literal);
            prop_assert_eq!(unescape(&escaped), literal);
        }

        #[test]
        fn prop_escaped_literal_compiles_and_matches(literal in "[ -~]{0,40}") {
            let regex = regex::RegexBuilder::new(&anchor(&escape(&literal)))
                .dot_matches_new_line(true)
                .build()
                .unwrap();
            prop_assert!(regex.is_match(&literal));
        }
    }
}
