//! Recording text format.
//!
//! Recordings are plain text files meant to be edited by hand. Single-line
//! fields are `KEY=value` with everything after `=` kept verbatim. Comment,
//! header and content are multi-line blocks between `[X]` and `[X_END]`
//! marker lines; a marker inside the block is written as `[[X_END]]`.

use super::pattern::RequestPattern;
use super::response::ResponseTemplate;
use super::types::Recording;
use crate::behaviors::{DelayStrategy, ResponseStrategy};
use crate::field::PatternField;
use crate::message::{Request, Response};
use std::fmt::Write as _;
use tracing::warn;

const BANNER: &str = "\
This is a mimic recording file.
You can modify this file in your editor of choice, but there are some rules you must follow:
* All fields except \"COMMENT\", \"HEADER\" and \"CONTENT\" must stay in one line.
* Everything after \"=\" for the fields will be included (text won't be trimmed), this includes whitespace.
* The \"[COMMENT<_END>]\", \"[HEADER<_END>]\" and \"[CONTENT<_END>]\" markers must be the only text on their lines.
* If the comment contains \"[COMMENT_END]\", this must be escaped as \"[[COMMENT_END]]\".
* If the header contains \"[HEADER_END]\", this must be escaped as \"[[HEADER_END]]\".
* If the content contains \"[CONTENT_END]\", this must be escaped as \"[[CONTENT_END]]\".
* Any text outside a field will be ignored, and erased if the recording is saved again.
";

const RECORDING: &str = "---RECORDING---";
const REQUEST: &str = "---REQUEST---";
const ORIGINAL_REQUEST: &str = "---ORIGINAL_REQUEST---";
const RESPONSE: &str = "---RESPONSE---";
const ORIGINAL_RESPONSE: &str = "---ORIGINAL_RESPONSE---";
const RESPONSE_STRATEGY: &str = "RESPONSE_STRATEGY=";
const DELAY_STRATEGY: &str = "DELAY_STRATEGY=";
const DELAY_MIN: &str = "DELAY_MIN=";
const DELAY_MEAN: &str = "DELAY_MEAN=";
const DELAY_MAX: &str = "DELAY_MAX=";
const WEIGHT: &str = "WEIGHT=";
const CODE: &str = "CODE=";

/// Single-line request fields, in file order.
const LINE_FIELDS: [PatternField; 6] = [
    PatternField::Protocol,
    PatternField::Host,
    PatternField::Port,
    PatternField::Path,
    PatternField::Query,
    PatternField::Method,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Comment,
    Header,
    Content,
}

impl Block {
    fn start(&self) -> &'static str {
        match self {
            Block::Comment => "[COMMENT]",
            Block::Header => "[HEADER]",
            Block::Content => "[CONTENT]",
        }
    }

    fn end(&self) -> &'static str {
        match self {
            Block::Comment => "[COMMENT_END]",
            Block::Header => "[HEADER_END]",
            Block::Content => "[CONTENT_END]",
        }
    }

    fn escaped_end(&self) -> &'static str {
        match self {
            Block::Comment => "[[COMMENT_END]]",
            Block::Header => "[[HEADER_END]]",
            Block::Content => "[[CONTENT_END]]",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Recording,
    Request,
    OriginalRequest,
    Response,
    OriginalResponse,
}

/// A recording file that cannot be read at all.
#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("no ---RECORDING--- marker found")]
    MissingRecording,
    #[error("line {line}: {block} block is never closed")]
    UnterminatedBlock { line: usize, block: &'static str },
    #[error("line {line}: ---ORIGINAL_RESPONSE--- before any ---RESPONSE---")]
    OrphanOriginalResponse { line: usize },
}

/// A value that was ignored while reading; the recording is still usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatWarning {
    pub line: usize,
    pub message: String,
}

/// Write a recording in the text format.
pub fn encode(recording: &Recording) -> String {
    let mut out = String::from(BANNER);
    out.push('\n');
    out.push_str(RECORDING);
    push_block(&mut out, Block::Comment, &recording.comment);
    let _ = write!(out, "\n{RESPONSE_STRATEGY}{}", recording.strategy);

    out.push_str("\n\n");
    out.push_str(REQUEST);
    let pattern = &recording.pattern;
    for field in LINE_FIELDS {
        let _ = write!(out, "\n{}={}", field.as_str(), pattern.get(field));
    }
    push_block(&mut out, Block::Header, pattern.get(PatternField::Header));
    push_block(&mut out, Block::Content, pattern.get(PatternField::Content));

    if let Some(original) = pattern.original() {
        out.push_str("\n\n");
        out.push_str(ORIGINAL_REQUEST);
        for field in LINE_FIELDS {
            let _ = write!(out, "\n{}={}", field.as_str(), field.value(original));
        }
        push_block(&mut out, Block::Header, &original.header);
        push_block(&mut out, Block::Content, &original.content);
    }

    for template in &recording.responses {
        out.push_str("\n\n");
        out.push_str(RESPONSE);
        let _ = write!(out, "\n{DELAY_STRATEGY}{}", template.delay_strategy());
        let _ = write!(out, "\n{DELAY_MIN}{}", template.delay_min());
        let _ = write!(out, "\n{DELAY_MEAN}{}", template.delay_mean());
        let _ = write!(out, "\n{DELAY_MAX}{}", template.delay_max());
        let _ = write!(out, "\n{WEIGHT}{}", template.weight());
        let _ = write!(out, "\n{CODE}{}", template.code());
        push_block(&mut out, Block::Header, template.header());
        push_block(&mut out, Block::Content, template.content());

        if let Some(original) = template.original() {
            out.push_str("\n\n");
            out.push_str(ORIGINAL_RESPONSE);
            let _ = write!(out, "\n{CODE}{}", original.code);
            push_block(&mut out, Block::Header, &original.header);
            push_block(&mut out, Block::Content, &original.content);
        }
    }
    out.push('\n');
    out
}

fn push_block(out: &mut String, block: Block, text: &str) {
    out.push('\n');
    out.push_str(block.start());
    out.push('\n');
    out.push_str(&text.replace(block.end(), block.escaped_end()));
    out.push('\n');
    out.push_str(block.end());
}

/// Read a recording, logging any ignored values.
pub fn decode(text: &str) -> Result<Recording, FormatError> {
    let (recording, warnings) = decode_with_warnings(text)?;
    for warning in warnings {
        warn!("Line {}: {}", warning.line, warning.message);
    }
    Ok(recording)
}

/// Read a recording and return the values that had to be ignored.
///
/// Lines outside known fields are skipped. Unparsable numbers and unknown
/// strategy names keep their defaults and are reported as warnings. Content
/// blocks keep carriage returns; everywhere else a line may end in `\r\n`.
pub fn decode_with_warnings(text: &str) -> Result<(Recording, Vec<FormatWarning>), FormatError> {
    let mut parser = Parser::default();
    for (index, raw) in text.split('\n').enumerate() {
        parser.line(index + 1, raw)?;
    }
    parser.finish()
}

struct Parser {
    section: Section,
    seen_recording: bool,
    open: Option<(Block, usize)>,
    buffer: String,
    comment: String,
    strategy: ResponseStrategy,
    pattern: RequestPattern,
    original_request: Option<Request>,
    responses: Vec<ResponseTemplate>,
    warnings: Vec<FormatWarning>,
}

impl Default for Parser {
    fn default() -> Self {
        Self {
            section: Section::Preamble,
            seen_recording: false,
            open: None,
            buffer: String::new(),
            comment: String::new(),
            strategy: ResponseStrategy::default(),
            pattern: RequestPattern::default(),
            original_request: None,
            responses: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

impl Parser {
    fn line(&mut self, number: usize, raw: &str) -> Result<(), FormatError> {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some((block, _)) = self.open {
            if line == block.end() {
                self.close_block(block);
            } else {
                self.buffer
                    .push_str(if block == Block::Content { raw } else { line });
                self.buffer.push('\n');
            }
            return Ok(());
        }

        if line.starts_with(RECORDING) {
            self.section = Section::Recording;
            self.seen_recording = true;
        } else if self.section == Section::Recording && line == Block::Comment.start() {
            self.open_block(Block::Comment, number);
        } else if let Some(value) = line
            .strip_prefix(RESPONSE_STRATEGY)
            .filter(|_| self.section == Section::Recording)
        {
            match value.parse::<ResponseStrategy>() {
                Ok(strategy) => self.strategy = strategy,
                Err(e) => self.warn(number, e.to_string()),
            }
        } else if line.starts_with(REQUEST) {
            self.section = Section::Request;
        } else if line.starts_with(ORIGINAL_REQUEST) {
            self.section = Section::OriginalRequest;
            self.original_request = Some(Request::default());
        } else if line.starts_with(ORIGINAL_RESPONSE) {
            let Some(template) = self.responses.last_mut() else {
                return Err(FormatError::OrphanOriginalResponse { line: number });
            };
            template.set_original(Some(Response::default()));
            self.section = Section::OriginalResponse;
        } else if line.starts_with(RESPONSE) {
            self.responses.push(ResponseTemplate::default());
            self.section = Section::Response;
        } else if line == Block::Header.start() {
            self.open_block(Block::Header, number);
        } else if line == Block::Content.start() {
            self.open_block(Block::Content, number);
        } else if let Some(value) = line.strip_prefix(CODE) {
            self.set_code(value);
        } else if self.section == Section::Response {
            self.response_line(number, line);
        } else {
            self.request_line(line);
        }
        Ok(())
    }

    fn request_line(&mut self, line: &str) {
        for field in LINE_FIELDS {
            let Some(value) = line
                .strip_prefix(field.as_str())
                .and_then(|rest| rest.strip_prefix('='))
            else {
                continue;
            };
            match self.section {
                Section::Request => self.pattern.set(field, value),
                Section::OriginalRequest => {
                    if let Some(original) = self.original_request.as_mut() {
                        *original.field_mut(field) = value.to_string();
                    }
                }
                _ => {}
            }
            return;
        }
    }

    fn response_line(&mut self, number: usize, line: &str) {
        let Some(template) = self.responses.last_mut() else {
            return;
        };
        if let Some(value) = line.strip_prefix(DELAY_STRATEGY) {
            match value.parse::<DelayStrategy>() {
                Ok(strategy) => template.set_delay_strategy(strategy),
                Err(e) => self.warn(number, e.to_string()),
            }
            return;
        }
        let setter: fn(&mut ResponseTemplate, i64) = if line.starts_with(DELAY_MIN) {
            ResponseTemplate::set_delay_min
        } else if line.starts_with(DELAY_MEAN) {
            ResponseTemplate::set_delay_mean
        } else if line.starts_with(DELAY_MAX) {
            ResponseTemplate::set_delay_max
        } else if line.starts_with(WEIGHT) {
            ResponseTemplate::set_weight
        } else {
            return;
        };
        let (key, value) = line.split_once('=').unwrap_or((line, ""));
        match value.trim().parse::<i64>() {
            Ok(number_value) => setter(template, number_value),
            Err(_) => self.warn(number, format!("{key} is not a number: '{value}'")),
        }
    }

    fn set_code(&mut self, value: &str) {
        let Some(template) = self.responses.last_mut() else {
            return;
        };
        match self.section {
            Section::Response => template.set_code(value),
            Section::OriginalResponse => {
                if let Some(original) = template.original_mut() {
                    original.code = value.to_string();
                }
            }
            _ => {}
        }
    }

    fn open_block(&mut self, block: Block, number: usize) {
        self.buffer.clear();
        self.open = Some((block, number));
    }

    fn close_block(&mut self, block: Block) {
        self.open = None;
        if self.buffer.ends_with('\n') {
            self.buffer.pop();
        }
        let text = self.buffer.replace(block.escaped_end(), block.end());
        match (block, self.section) {
            (Block::Comment, _) => self.comment = text,
            (Block::Header, Section::Request) => self.pattern.set(PatternField::Header, text),
            (Block::Content, Section::Request) => self.pattern.set(PatternField::Content, text),
            (Block::Header, Section::OriginalRequest) => {
                if let Some(original) = self.original_request.as_mut() {
                    original.header = text;
                }
            }
            (Block::Content, Section::OriginalRequest) => {
                if let Some(original) = self.original_request.as_mut() {
                    original.raw_content = text.clone().into_bytes().into();
                    original.content = text;
                }
            }
            (Block::Header, Section::Response) => {
                if let Some(template) = self.responses.last_mut() {
                    template.set_header(text);
                }
            }
            (Block::Content, Section::Response) => {
                if let Some(template) = self.responses.last_mut() {
                    template.set_content(text);
                }
            }
            (Block::Header, Section::OriginalResponse) => {
                if let Some(original) = self.responses.last_mut().and_then(|t| t.original_mut()) {
                    original.header = text;
                }
            }
            (Block::Content, Section::OriginalResponse) => {
                if let Some(original) = self.responses.last_mut().and_then(|t| t.original_mut()) {
                    original.content = text;
                }
            }
            (Block::Header | Block::Content, Section::Preamble | Section::Recording) => {}
        }
    }

    fn warn(&mut self, line: usize, message: String) {
        self.warnings.push(FormatWarning { line, message });
    }

    fn finish(mut self) -> Result<(Recording, Vec<FormatWarning>), FormatError> {
        if let Some((block, line)) = self.open {
            return Err(FormatError::UnterminatedBlock {
                line,
                block: block.start(),
            });
        }
        if !self.seen_recording {
            return Err(FormatError::MissingRecording);
        }
        self.pattern.set_original(self.original_request.take());
        let mut recording = Recording::new(self.pattern, self.responses);
        recording.strategy = self.strategy;
        recording.comment = self.comment;
        Ok((recording, self.warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_recording() -> Recording {
        let request = Request::builder()
            .host("example.com")
            .path("/x")
            .header("accept: */*")
            .content("line one\n[CONTENT_END]\nline three")
            .build();
        let mut template = ResponseTemplate::from_response(&Response::new(
            "200",
            "Content-Type: text/plain",
            "ok $1",
        ));
        template.set_delay_strategy(DelayStrategy::Normal);
        template.set_delay_min(10);
        template.set_delay_mean(20);
        template.set_delay_max(30);
        template.set_weight(3);
        let mut recording = Recording::new(RequestPattern::from_request(&request), vec![template])
            .with_strategy(ResponseStrategy::Random);
        recording.comment = "Captured from staging\n[COMMENT_END] inside".to_string();
        recording
    }

    #[test]
    fn test_encode_layout() {
        let text = encode(&sample_recording());
        assert!(text.starts_with("This is a mimic recording file."));
        assert!(text.contains("\n---RECORDING---\n[COMMENT]\nCaptured from staging\n[[COMMENT_END]] inside\n[COMMENT_END]\nRESPONSE_STRATEGY=RANDOM\n"));
        assert!(text.contains("\n---REQUEST---\nPROTOCOL=^http$\nHOST=^example\\.com$\nPORT=^80$\nPATH=^/x$\nQUERY=^$\nMETHOD=^GET$\n[HEADER]\n^accept: \\*/\\*$\n[HEADER_END]\n"));
        assert!(text.contains("\n---ORIGINAL_REQUEST---\nPROTOCOL=http\nHOST=example.com\n"));
        assert!(text.contains("[CONTENT]\nline one\n[[CONTENT_END]]\nline three\n[CONTENT_END]"));
        assert!(text.contains("\n---RESPONSE---\nDELAY_STRATEGY=NORMAL\nDELAY_MIN=10\nDELAY_MEAN=20\nDELAY_MAX=30\nWEIGHT=3\nCODE=200\n"));
        assert!(text.contains("\n---ORIGINAL_RESPONSE---\nCODE=200\n"));
    }

    #[test]
    fn test_decode_reads_back_encoded() {
        let recording = sample_recording();
        let decoded = decode(&encode(&recording)).unwrap();
        assert_eq!(decoded.pattern, recording.pattern);
        assert_eq!(decoded.pattern.original(), recording.pattern.original());
        assert_eq!(decoded.comment, recording.comment);
        assert_eq!(decoded.strategy, ResponseStrategy::Random);
        assert_eq!(decoded.responses.len(), 1);
        let template = &decoded.responses[0];
        assert_eq!(template, &recording.responses[0]);
        assert_eq!(template.delay_strategy(), DelayStrategy::Normal);
        assert_eq!(
            (template.delay_min(), template.delay_mean(), template.delay_max()),
            (10, 20, 30)
        );
        assert_eq!(template.weight(), 3);
        assert_eq!(template.original(), recording.responses[0].original());
    }

    #[test]
    fn test_decode_empty_blocks() {
        let text = "---RECORDING---\n---REQUEST---\nPATH=^/$\n[HEADER]\n\n[HEADER_END]\n[CONTENT]\n[CONTENT_END]\n";
        let recording = decode(text).unwrap();
        assert_eq!(recording.pattern.get(PatternField::Header), "");
        assert_eq!(recording.pattern.get(PatternField::Content), "");
        assert_eq!(recording.pattern.get(PatternField::Path), "^/$");
    }

    #[test]
    fn test_decode_keeps_trailing_blank_lines_but_one() {
        let text = "---RECORDING---\n---RESPONSE---\nCODE=200\n[CONTENT]\na\n\n[CONTENT_END]\n";
        let recording = decode(text).unwrap();
        assert_eq!(recording.responses[0].content(), "a\n");
    }

    #[test]
    fn test_content_carriage_returns_survive() {
        let body: String = [0x89u8, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n', 0x00, 0xff]
            .iter()
            .map(|&byte| char::from(byte))
            .collect();
        let response = Response::new("200", "content-type: image/png", body.as_str());
        let recording = Recording::new(
            RequestPattern::default(),
            vec![ResponseTemplate::from_response(&response)],
        );
        let decoded = decode(&encode(&recording)).unwrap();
        assert_eq!(decoded.responses[0].content(), recording.responses[0].content());
        assert_eq!(decoded.responses[0].original().unwrap().content, body);
    }

    #[test]
    fn test_decode_crlf_file() {
        let text = "---RECORDING---\r\n---RESPONSE---\r\nWEIGHT=2\r\nCODE=204\r\n[HEADER]\r\nx: 1\r\n[HEADER_END]\r\n";
        let recording = decode(text).unwrap();
        assert_eq!(recording.responses[0].code(), "204");
        assert_eq!(recording.responses[0].weight(), 2);
        assert_eq!(recording.responses[0].header(), "x: 1");
    }

    #[test]
    fn test_decode_values_kept_verbatim() {
        let text = "---RECORDING---\n---REQUEST---\nQUERY= a=1 \n";
        let recording = decode(text).unwrap();
        assert_eq!(recording.pattern.get(PatternField::Query), " a=1 ");
    }

    #[test]
    fn test_decode_malformed_values_warn_and_default() {
        let text = "---RECORDING---\nRESPONSE_STRATEGY=ROUND_ROBIN\n---RESPONSE---\nDELAY_STRATEGY=GAMMA\nDELAY_MIN=abc\nWEIGHT=-4\nCODE=200\n";
        let (recording, warnings) = decode_with_warnings(text).unwrap();
        assert_eq!(recording.strategy, ResponseStrategy::Sequential);
        let template = &recording.responses[0];
        assert_eq!(template.delay_strategy(), DelayStrategy::None);
        assert_eq!(template.delay_min(), 0);
        assert_eq!(template.weight(), 0);
        assert_eq!(warnings.len(), 3);
        assert_eq!(warnings[0].line, 2);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_decode_logs_ignored_values() {
        let text = "---RECORDING---\n---RESPONSE---\nCODE=200\nDELAY_MIN=abc\n";
        decode(text).unwrap();
        assert!(logs_contain("Line 4:"));
    }

    #[test]
    fn test_decode_response_fields_outside_response_ignored() {
        let text = "---RECORDING---\nWEIGHT=5\nCODE=201\n---RESPONSE---\nCODE=200\n";
        let recording = decode(text).unwrap();
        assert_eq!(recording.responses.len(), 1);
        assert_eq!(recording.responses[0].code(), "200");
        assert_eq!(recording.responses[0].weight(), 1);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            decode("just some text\n"),
            Err(FormatError::MissingRecording)
        ));
        assert!(matches!(
            decode("---RECORDING---\n---REQUEST---\n[HEADER]\nx\n"),
            Err(FormatError::UnterminatedBlock { line: 3, .. })
        ));
        assert!(matches!(
            decode("---RECORDING---\n---ORIGINAL_RESPONSE---\n"),
            Err(FormatError::OrphanOriginalResponse { line: 2 })
        ));
    }
}
