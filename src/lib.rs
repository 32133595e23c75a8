//! Compiler for indentation-based Jade/Pug templates, producing PHP templates.
//!
//! ```text
//! source ─▶ Lexer ─▶ TreeBuilder ─▶ Document ─▶ includes ─▶ extends ─▶ mixins ─▶ PhpGenerator
//! ```

pub mod ast;
pub mod compiler;
pub mod error;
pub mod expression;
pub mod filter;
pub mod generate;
pub mod html;
pub mod parser;
pub mod resolver;

pub use ast::{Document, NodeId, NodeKind};
pub use compiler::{Compiler, CompilerOptions};
pub use error::{Diagnostic, Error, ErrorKind};
pub use filter::{Filter, FilterContext, FilterOptions, Filters};
pub use generate::{FormatterOptions, IndentStyle};
pub use html::Mode;
pub use parser::{parse, tokenize, Position, Token, TokenKind};
pub use resolver::Resolver;

/// Compile a template with default options.
///
/// Includes and extends can only be resolved through search paths, so use
/// [`compile_with`] or [`Compiler::compile_file`] for templates that have them.
pub fn compile(source: &str) -> Result<String, Error> {
    Compiler::default().compile(source)
}

pub fn compile_with(source: &str, options: &CompilerOptions) -> Result<String, Error> {
    Compiler::new(options.clone()).compile(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile() {
        assert_eq!(compile("p Hello").unwrap(), "<p>Hello</p>");
    }

    #[test]
    fn test_compile_with_pretty() {
        let options = CompilerOptions {
            formatter: FormatterOptions { pretty: true, ..Default::default() },
            ..Default::default()
        };
        assert_eq!(compile_with("ul\n  li a\n  li b", &options).unwrap(), "<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>");
    }

    #[test]
    fn test_errors_carry_kind_and_position() {
        let err = compile("div\n\tp\n  p").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MixedIndentation));
        assert_eq!(err.position().map(|p| p.line), Some(3));
    }
}
