//! Normalized response.

/// A response as the proxy stores and returns it.
///
/// `delay_ms` is transient: it is how long the proxy should hold the response
/// before returning it and takes no part in equality.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub code: String,
    pub reason: String,
    pub header: String,
    pub content: String,
    pub delay_ms: u64,
}

impl Response {
    pub fn new(
        code: impl Into<String>,
        header: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            header: header.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Status code as a number, if it is one hyper will accept.
    pub fn status(&self) -> Option<u16> {
        self.code
            .trim()
            .parse::<u16>()
            .ok()
            .filter(|code| (100..1000).contains(code))
    }

    /// Headers parsed out of the header block.
    pub fn header_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.header.lines().filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim(), value.trim_start()))
        })
    }
}

impl PartialEq for Response {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.header == other.header && self.content == other.content
    }
}

impl Eq for Response {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_equality_ignores_reason_and_delay() {
        let a = Response::new("200", "a: b", "ok");
        let mut b = a.clone();
        b.reason = "OK".to_string();
        b.delay_ms = 500;
        assert_eq!(a, b);
        b.content = "other".to_string();
        assert_ne!(a, b);
    }

    #[test]
    fn test_response_status_parse() {
        assert_eq!(Response::new("200", "", "").status(), Some(200));
        assert_eq!(Response::new(" 404 ", "", "").status(), Some(404));
        assert_eq!(Response::new("abc", "", "").status(), None);
        assert_eq!(Response::new("42", "", "").status(), None);
    }
}
