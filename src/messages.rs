//! Diagnostic message collection.
//!
//! Verifiers describe what they did through a [`MessageSink`] instead of
//! printing, so the same transcript can be shown on a terminal, embedded in a
//! JSON report, or asserted on in tests.

/// An append-only receiver of human-readable diagnostic lines.
pub trait MessageSink {
    fn emit(&mut self, line: &str);
}

/// Sink that drops every line, for callers that only want the verdict.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl MessageSink for Discard {
    fn emit(&mut self, _line: &str) {}
}

/// Sink that keeps every line in emission order.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MessageLog {
    lines: Vec<String>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines
    }
}

impl MessageSink for MessageLog {
    fn emit(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}

impl MessageSink for Vec<String> {
    fn emit(&mut self, line: &str) {
        self.push(line.to_string());
    }
}
