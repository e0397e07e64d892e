//! Response templates stored in recordings.

use crate::behaviors::DelayStrategy;
use crate::cache::Bindings;
use crate::message::Response;
use crate::template::{escape, Template};
use once_cell::sync::OnceCell;

/// Code, header and content templates with replay settings.
///
/// The three templates are parsed on first render and reused afterwards.
#[derive(Debug, Clone)]
pub struct ResponseTemplate {
    code: String,
    header: String,
    content: String,
    delay_strategy: DelayStrategy,
    delay_min: u64,
    delay_mean: u64,
    delay_max: u64,
    weight: u64,
    original: Option<Response>,
    compiled: OnceCell<Compiled>,
}

#[derive(Debug, Clone)]
struct Compiled {
    code: Template,
    header: Template,
    content: Template,
}

impl Default for ResponseTemplate {
    fn default() -> Self {
        Self {
            code: String::new(),
            header: String::new(),
            content: String::new(),
            delay_strategy: DelayStrategy::None,
            delay_min: 0,
            delay_mean: 0,
            delay_max: 0,
            weight: 1,
            original: None,
            compiled: OnceCell::new(),
        }
    }
}

impl ResponseTemplate {
    /// Template from raw template text, weight 1 and no delay.
    pub fn new(code: impl Into<String>, header: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            header: header.into(),
            content: content.into(),
            ..Self::default()
        }
    }

    /// Template that renders back exactly `response`.
    pub fn from_response(response: &Response) -> Self {
        Self {
            code: escape(&response.code),
            header: escape(&response.header),
            content: escape(&response.content),
            original: Some(response.clone()),
            ..Self::default()
        }
    }

    /// Render with the captured request values and sample a delay.
    pub fn render(&self, bindings: &Bindings) -> Response {
        let compiled = self.compiled.get_or_init(|| Compiled {
            code: Template::parse(&self.code),
            header: Template::parse(&self.header),
            content: Template::parse(&self.content),
        });
        Response {
            code: compiled.code.render(bindings),
            reason: String::new(),
            header: compiled.header.render(bindings),
            content: compiled.content.render(bindings),
            delay_ms: self.sample_delay(),
        }
    }

    /// Delay in milliseconds drawn from the configured strategy.
    pub fn sample_delay(&self) -> u64 {
        self.delay_strategy
            .get_duration_ms(self.delay_min, self.delay_mean, self.delay_max)
    }

    /// Status code template.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Header block template.
    pub fn header(&self) -> &str {
        &self.header
    }

    /// Body template.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Replace the code template; it is parsed again on the next render.
    pub fn set_code(&mut self, code: impl Into<String>) {
        self.code = code.into();
        self.compiled = OnceCell::new();
    }

    /// Replace the header template; it is parsed again on the next render.
    pub fn set_header(&mut self, header: impl Into<String>) {
        self.header = header.into();
        self.compiled = OnceCell::new();
    }

    /// Replace the body template; it is parsed again on the next render.
    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.compiled = OnceCell::new();
    }

    /// Strategy used by [`Self::sample_delay`].
    pub fn delay_strategy(&self) -> DelayStrategy {
        self.delay_strategy
    }

    /// Strategy used by [`Self::sample_delay`].
    pub fn set_delay_strategy(&mut self, strategy: DelayStrategy) {
        self.delay_strategy = strategy;
    }

    /// Lower delay bound in milliseconds.
    pub fn delay_min(&self) -> u64 {
        self.delay_min
    }

    /// Mean delay in milliseconds; the delay of `FIXED`.
    pub fn delay_mean(&self) -> u64 {
        self.delay_mean
    }

    /// Upper delay bound in milliseconds.
    pub fn delay_max(&self) -> u64 {
        self.delay_max
    }

    /// Lower delay bound. Negative values are clamped to 0.
    pub fn set_delay_min(&mut self, ms: i64) {
        self.delay_min = ms.max(0) as u64;
    }

    /// Mean delay. Negative values are clamped to 0.
    pub fn set_delay_mean(&mut self, ms: i64) {
        self.delay_mean = ms.max(0) as u64;
    }

    /// Upper delay bound. Negative values are clamped to 0.
    pub fn set_delay_max(&mut self, ms: i64) {
        self.delay_max = ms.max(0) as u64;
    }

    /// Relative selection weight; 0 never selects this response.
    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Negative weights are clamped to 0. A weight of 0 keeps the response
    /// in the recording but never selects it.
    pub fn set_weight(&mut self, weight: i64) {
        self.weight = weight.max(0) as u64;
    }

    /// Response this template was recorded from, if any.
    pub fn original(&self) -> Option<&Response> {
        self.original.as_ref()
    }

    /// Mutable access to the recorded response.
    pub fn original_mut(&mut self) -> Option<&mut Response> {
        self.original.as_mut()
    }

    /// Attach or drop the recorded response.
    pub fn set_original(&mut self, original: Option<Response>) {
        self.original = original;
    }
}

/// Value equality on the three templates, as used when merging recorded
/// responses.
impl PartialEq for ResponseTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code && self.header == other.header && self.content == other.content
    }
}

impl Eq for ResponseTemplate {}
