//! Splitting template text into literal and variable segments.

const DELIMITER: u8 = b'$';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text copied verbatim, with `$$` already reduced to `$`.
    Literal(String),
    /// Variable reference, `name` or `FIELD:name`.
    Variable(String),
}

/// Parse template text.
///
/// A run of delimiters of odd length toggles between literal and variable
/// mode; an even run is escaped text. When a variable opens, the last
/// delimiter of the run opens it and the rest stay in the literal. When a
/// variable closes, the first delimiter of the run closes it and the rest
/// carry into the following literal. An unterminated variable is kept as
/// literal text.
pub fn parse_segments(text: &str) -> Vec<Segment> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut in_variable = false;
    let mut start = 0;
    let mut index = 0;

    while let Some(offset) = bytes[index..].iter().position(|&b| b == DELIMITER) {
        let run_start = index + offset;
        let run_len = bytes[run_start..]
            .iter()
            .take_while(|&&b| b == DELIMITER)
            .count();
        index = run_start + run_len;
        if run_len % 2 == 0 {
            continue;
        }
        let delimiter = if in_variable {
            run_start
        } else {
            run_start + run_len - 1
        };
        segments.push(make_segment(in_variable, &text[start..delimiter]));
        in_variable = !in_variable;
        start = delimiter + 1;
        index = start;
    }
    segments.push(make_segment(false, &text[start..]));
    segments
}

fn make_segment(variable: bool, text: &str) -> Segment {
    if variable {
        Segment::Variable(text.to_string())
    } else {
        Segment::Literal(text.replace("$$", "$"))
    }
}
