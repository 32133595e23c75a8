use crate::expression;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndentStyle {
    #[default]
    Space,
    Tab,
}

/// Whitespace and quoting style of the generated code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterOptions {
    pub indent_style: IndentStyle,
    pub indent_width: usize,
    pub line_break: String,
    /// Quote around attribute values in markup
    pub quote_style: char,
    /// Quote around string literals in PHP code
    pub code_quote_style: char,
    pub pretty: bool,
}

impl Default for FormatterOptions {
    fn default() -> Self {
        Self {
            indent_style: IndentStyle::Space,
            indent_width: 2,
            line_break: "\n".to_string(),
            quote_style: '"',
            code_quote_style: '\'',
            pretty: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Formatter {
    options: FormatterOptions,
    unit: String,
}

impl Formatter {
    pub fn new(options: FormatterOptions) -> Self {
        let unit = match options.indent_style {
            IndentStyle::Space => " ".repeat(options.indent_width),
            IndentStyle::Tab => "\t".to_string(),
        };
        Self { options, unit }
    }

    pub fn options(&self) -> &FormatterOptions {
        &self.options
    }

    pub fn is_pretty(&self) -> bool {
        self.options.pretty
    }

    pub fn line_break(&self) -> &str {
        &self.options.line_break
    }

    pub fn indent(&self, depth: usize) -> String {
        self.unit.repeat(depth)
    }

    /// Attribute value wrapped in the markup quote
    pub fn quote(&self, value: &str) -> String {
        let q = self.options.quote_style;
        format!("{q}{value}{q}")
    }

    /// PHP string literal in the code quote
    pub fn code_string(&self, text: &str) -> String {
        expression::code_string(text, self.options.code_quote_style)
    }

    pub fn code_quote(&self) -> char {
        self.options.code_quote_style
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(FormatterOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indent_units() {
        let spaces = Formatter::new(FormatterOptions { indent_width: 4, ..Default::default() });
        assert_eq!(spaces.indent(2), "        ");

        let tabs = Formatter::new(FormatterOptions { indent_style: IndentStyle::Tab, ..Default::default() });
        assert_eq!(tabs.indent(2), "\t\t");
    }

    #[test]
    fn test_quotes() {
        let formatter = Formatter::new(FormatterOptions { quote_style: '\'', code_quote_style: '"', ..Default::default() });
        assert_eq!(formatter.quote("x"), "'x'");
        assert_eq!(formatter.code_string("say \"hi\""), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_options_from_partial_json() {
        let options: FormatterOptions = serde_json::from_str(r#"{"pretty": true, "indent_style": "tab"}"#).unwrap();
        assert!(options.pretty);
        assert_eq!(options.indent_style, IndentStyle::Tab);
        assert_eq!(options.quote_style, '"');
    }
}
