pub mod lexer;
pub mod reader;
pub mod token;
mod tree_builder;

pub use lexer::{Lexer, tokenize};
pub use reader::{Reader, ReaderError};
pub use token::{Position, Token, TokenKind};
use tree_builder::TreeBuilder;

use crate::ast::Document;
use crate::error::Error;

/// Parser trait - converts template source to a document tree
pub trait Parser {
    fn parse(&self, source: &str) -> Result<Document, Error>;
}

/// Indentation template parser
pub struct JadeParser {
    // Configuration only, no state
}

impl JadeParser {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for JadeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for JadeParser {
    fn parse(&self, source: &str) -> Result<Document, Error> {
        // Tokens are pulled lazily, so a lex error stops the build at its line
        TreeBuilder::new(Lexer::new(source)).build()
    }
}

/// Parse a template with the default parser
pub fn parse(source: &str) -> Result<Document, Error> {
    JadeParser::new().parse(source)
}
