use super::Formatter;

/// Output buffer that accumulates generated code
pub struct Output {
    buffer: String,
    pretty: bool,
    line_break: String,
    unit: String,
}

impl Output {
    pub fn new(formatter: &Formatter) -> Self {
        Self {
            buffer: String::new(),
            pretty: formatter.is_pretty(),
            line_break: formatter.line_break().to_string(),
            unit: formatter.indent(1),
        }
    }

    /// Add text as-is
    pub fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Start a new line at `depth`. Does nothing outside pretty mode or at the very start.
    pub fn line(&mut self, depth: usize) {
        if !self.pretty || self.buffer.is_empty() {
            return;
        }
        self.buffer.push_str(&self.line_break);
        for _ in 0..depth {
            self.buffer.push_str(&self.unit);
        }
    }

    pub fn is_pretty(&self) -> bool {
        self.pretty
    }

    /// Finish and return the generated code
    pub fn finish(self) -> String {
        self.buffer
    }
}
