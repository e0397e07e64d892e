//! Body text encoding, taken from the `charset` parameter of a header block.

use bytes::Bytes;
use std::fmt;

/// How a body is turned into text and back.
///
/// ISO-8859-1 maps every byte to the code point of the same value, so any
/// body survives decode and encode unchanged. It is used for every charset
/// other than UTF-8 and when no charset is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    Utf8,
    #[default]
    Latin1,
}

impl Charset {
    /// Charset named by the first `charset=` parameter in `header`. The value
    /// ends at `;`, a space or the end of the line, and may be quoted.
    pub fn from_header_block(header: &str) -> Self {
        const PARAMETER: &str = "charset=";
        let lower = header.to_ascii_lowercase();
        let Some(start) = lower.find(PARAMETER) else {
            return Charset::Latin1;
        };
        let rest = &lower[start + PARAMETER.len()..];
        let end = rest.find(|c: char| c == ';' || c == ' ' || c == '\n').unwrap_or(rest.len());
        let name = rest[..end].trim_matches(|c| c == '"' || c == '\'');
        match name {
            "utf-8" | "utf8" => Charset::Utf8,
            _ => Charset::Latin1,
        }
    }

    /// Body as text. Only a UTF-8 body that is not valid UTF-8 loses bytes.
    pub fn decode(&self, body: &[u8]) -> String {
        match self {
            Charset::Utf8 => String::from_utf8_lossy(body).into_owned(),
            Charset::Latin1 => body.iter().map(|&byte| char::from(byte)).collect(),
        }
    }

    /// Text as body bytes. Characters ISO-8859-1 cannot hold become `?`.
    pub fn encode(&self, text: &str) -> Bytes {
        match self {
            Charset::Utf8 => Bytes::copy_from_slice(text.as_bytes()),
            Charset::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect::<Vec<u8>>()
                .into(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Charset::Utf8 => "UTF-8",
            Charset::Latin1 => "ISO-8859-1",
        }
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_charset_from_header_block() {
        assert_eq!(
            Charset::from_header_block("Content-Type: text/html; charset=UTF-8"),
            Charset::Utf8
        );
        assert_eq!(
            Charset::from_header_block("content-type: application/json;charset=\"utf-8\"\nx-id: 1"),
            Charset::Utf8
        );
        assert_eq!(
            Charset::from_header_block("content-type: text/plain; charset=windows-1252; format=flowed"),
            Charset::Latin1
        );
        assert_eq!(Charset::from_header_block("content-type: image/png"), Charset::Latin1);
        assert_eq!(Charset::from_header_block(""), Charset::Latin1);
    }

    #[test]
    fn test_latin1_keeps_every_byte() {
        let body: Vec<u8> = (0..=255).collect();
        let text = Charset::Latin1.decode(&body);
        assert_eq!(text.chars().count(), 256);
        assert_eq!(&Charset::Latin1.encode(&text)[..], &body[..]);
    }

    #[test]
    fn test_latin1_unmappable_becomes_question_mark() {
        assert_eq!(&Charset::Latin1.encode("é€")[..], &[0xe9, b'?'][..]);
    }

    #[test]
    fn test_utf8_text() {
        let text = Charset::Utf8.decode("blåbær".as_bytes());
        assert_eq!(text, "blåbær");
        assert_eq!(&Charset::Utf8.encode(&text)[..], "blåbær".as_bytes());
    }
}
