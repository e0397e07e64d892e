//! Response templates with `$variable$` placeholders.
//!
//! A template is literal text with variables between single `$` delimiters.
//! `$$` is a literal dollar sign. A variable is either `FIELD:name`, looked up
//! only in the captures of that request field, or a bare `name` probed across
//! all fields in tree order. Names that are not capture-group names are tried
//! as a numeric group index, with `0` being the whole match.
//!
//! # Module Structure
//!
//! - `segment` - Parsing template text into literal and variable segments

mod segment;

pub use segment::{parse_segments, Segment};

use crate::cache::Bindings;
use tracing::{debug, warn};

/// Text rendered for a variable with no bound value.
pub const MISSING_VALUE: &str = "null";

/// A template parsed once and rendered many times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(text: &str) -> Self {
        Self {
            segments: parse_segments(text),
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Variable names referenced by this template.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Variable(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Substitute bound capture values into the template.
    pub fn render(&self, bindings: &Bindings) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => match bindings.lookup(name) {
                    Some(value) => {
                        debug!("Inserting value for variable \"{}\": {}", name, value);
                        out.push_str(value);
                    }
                    None => {
                        warn!("No value bound for template variable \"{}\"", name);
                        out.push_str(MISSING_VALUE);
                    }
                },
            }
        }
        out
    }
}

/// Escape literal text so it renders unchanged.
pub fn escape(text: &str) -> String {
    text.replace('$', "$$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FieldCapture;
    use crate::field::PatternField;
    use regex::Regex;

    fn bindings_for(field: PatternField, pattern: &str, value: &str) -> Bindings {
        let regex = Regex::new(pattern).unwrap();
        let captures = regex.captures(value).unwrap();
        let mut bindings = Bindings::default();
        bindings.bind(field, FieldCapture::from_captures(&regex, &captures));
        bindings
    }

    #[test]
    fn test_render_literal_only() {
        let template = Template::parse("plain text");
        assert_eq!(template.render(&Bindings::default()), "plain text");
    }

    #[test]
    fn test_render_named_variable() {
        let bindings = bindings_for(PatternField::Path, r"^/users/(?P<id>\d+)$", "/users/42");
        let template = Template::parse(r#"{"id": $id$}"#);
        assert_eq!(template.render(&bindings), r#"{"id": 42}"#);
    }

    #[test]
    fn test_render_field_qualified_variable() {
        let bindings = bindings_for(PatternField::Path, r"^/users/(?P<id>\d+)$", "/users/7");
        assert_eq!(Template::parse("$PATH:id$").render(&bindings), "7");
        assert_eq!(Template::parse("$path:id$").render(&bindings), "7");
        assert_eq!(Template::parse("$QUERY:id$").render(&bindings), MISSING_VALUE);
    }

    #[test]
    fn test_render_positional_group() {
        let bindings = bindings_for(PatternField::Path, r"^/a/(\w+)/(\w+)$", "/a/b/c");
        assert_eq!(Template::parse("$2$-$1$").render(&bindings), "c-b");
        assert_eq!(Template::parse("$0$").render(&bindings), "/a/b/c");
        assert_eq!(Template::parse("$3$").render(&bindings), MISSING_VALUE);
    }

    #[test]
    fn test_render_missing_variable_is_null() {
        let template = Template::parse("Hello $name$!");
        assert_eq!(template.render(&Bindings::default()), "Hello null!");
    }

    #[test]
    fn test_render_escaped_dollar() {
        let template = Template::parse("costs $$5");
        assert_eq!(template.render(&Bindings::default()), "costs $5");
    }

    #[test]
    fn test_escape_renders_back_to_original() {
        let original = "price: $10, $$ and $name$";
        let template = Template::parse(&escape(original));
        assert_eq!(template.render(&Bindings::default()), original);
    }

    #[test]
    fn test_variables_listed() {
        let template = Template::parse("$a$ and $PATH:b$");
        let names: Vec<&str> = template.variables().collect();
        assert_eq!(names, vec!["a", "PATH:b"]);
    }
}
