mod formatter;
mod output;
mod php;

pub use formatter::{Formatter, FormatterOptions, IndentStyle};
pub use output::Output;
pub use php::PhpGenerator;

use crate::ast::Document;
use crate::error::Error;
use crate::html::Mode;

/// Generator options
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub formatter: FormatterOptions,
    /// Output mode; taken from the first doctype when not set
    pub mode: Option<Mode>,
    /// Charset passed to `htmlspecialchars`
    pub escape_charset: String,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            formatter: FormatterOptions::default(),
            mode: None,
            escape_charset: "UTF-8".to_string(),
        }
    }
}

/// Generator trait - converts a resolved document to code
pub trait Generator {
    fn generate(&self, document: &Document, options: &GenerateOptions) -> Result<String, Error>;
}
