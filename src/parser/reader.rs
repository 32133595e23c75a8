//! Character cursor over template source.
//!
//! The reader knows nothing about template syntax. It offers the scanning
//! primitives the lexer is built from: quoted strings, bracket-balanced
//! expressions, predicate runs and line handling. Every read returns a slice
//! of the original input; an empty slice (or `None`) signals "no match".

use crate::error::{Error, ErrorKind};
use crate::parser::token::Position;

/// Saved reader location, used to backtrack after a speculative read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    byte: usize,
    line: usize,
    offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReaderError {
    #[error("unbalanced `{bracket}`")]
    UnbalancedBrackets { bracket: char, position: Position },
    #[error("string is never closed")]
    UnterminatedString { position: Position },
}

impl ReaderError {
    pub fn position(&self) -> Position {
        match self {
            ReaderError::UnbalancedBrackets { position, .. } => *position,
            ReaderError::UnterminatedString { position } => *position,
        }
    }
}

impl From<ReaderError> for Error {
    fn from(err: ReaderError) -> Self {
        let kind = match err {
            ReaderError::UnbalancedBrackets { .. } => ErrorKind::UnbalancedBrackets,
            ReaderError::UnterminatedString { .. } => ErrorKind::UnterminatedString,
        };
        Error::lex(kind, err.to_string(), err.position())
    }
}

pub struct Reader<'a> {
    input: &'a str,
    cursor: Cursor,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str) -> Self {
        Self::starting_at(input, Position::new(1, 0))
    }

    /// Reader whose reported positions start at `position` (for fragments cut out of a template)
    pub fn starting_at(input: &'a str, position: Position) -> Self {
        Self {
            input,
            cursor: Cursor {
                byte: 0,
                line: position.line,
                offset: position.offset,
            },
        }
    }

    // === Cursor ===

    pub fn position(&self) -> Position {
        Position::new(self.cursor.line, self.cursor.offset)
    }

    pub fn checkpoint(&self) -> Cursor {
        self.cursor
    }

    pub fn rewind(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    /// Text consumed since `from`
    pub fn slice_from(&self, from: Cursor) -> &'a str {
        &self.input[from.byte..self.cursor.byte]
    }

    pub fn slice(&self, from: Cursor, to: Cursor) -> &'a str {
        &self.input[from.byte..to.byte]
    }

    pub fn remainder(&self) -> &'a str {
        &self.input[self.cursor.byte..]
    }

    pub fn is_at_end(&self) -> bool {
        self.cursor.byte >= self.input.len()
    }

    pub fn is_at_new_line(&self) -> bool {
        matches!(self.peek(), Some('\n' | '\r'))
    }

    /// At a line terminator or the end of input
    pub fn is_at_line_end(&self) -> bool {
        self.is_at_end() || self.is_at_new_line()
    }

    pub fn peek(&self) -> Option<char> {
        let rest = self.remainder();
        // Fast path for ASCII
        match rest.as_bytes().first() {
            Some(&b) if b < 128 => Some(b as char),
            Some(_) => rest.chars().next(),
            None => None,
        }
    }

    pub fn peek_nth(&self, n: usize) -> Option<char> {
        self.remainder().chars().nth(n)
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.remainder().starts_with(prefix)
    }

    /// Consume one character, keeping line and offset in step
    pub fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.cursor.byte += c.len_utf8();
        match c {
            '\n' => {
                self.cursor.line += 1;
                self.cursor.offset = 0;
            }
            // A lone CR ends a line; in CRLF the LF does
            '\r' if self.peek() != Some('\n') => {
                self.cursor.line += 1;
                self.cursor.offset = 0;
            }
            '\r' => {}
            _ => self.cursor.offset += 1,
        }
        Some(c)
    }

    /// Consume `prefix` if the input continues with it
    pub fn consume(&mut self, prefix: &str) -> bool {
        if !self.starts_with(prefix) {
            return false;
        }
        for _ in prefix.chars() {
            self.advance();
        }
        true
    }

    // === Runs ===

    pub fn read_while(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        let start = self.cursor;
        while let Some(c) = self.peek() {
            if !predicate(c) {
                break;
            }
            self.advance();
        }
        self.slice_from(start)
    }

    pub fn read_until(&mut self, predicate: impl Fn(char) -> bool) -> &'a str {
        self.read_while(|c| !predicate(c))
    }

    /// Read to (not including) the next line terminator
    pub fn read_until_new_line(&mut self) -> &'a str {
        self.read_until(|c| c == '\n' || c == '\r')
    }

    /// Consume one line terminator (`\n`, `\r\n` or `\r`)
    pub fn read_new_line(&mut self) -> bool {
        self.consume("\r\n") || self.consume("\n") || self.consume("\r")
    }

    /// Inline whitespace (spaces and tabs)
    pub fn read_spaces(&mut self) -> &'a str {
        self.read_while(|c| c == ' ' || c == '\t')
    }

    // === Structured reads ===

    /// Read a quoted string and return its unescaped contents.
    ///
    /// Returns `Ok(None)` when the reader is not at a quote. Inside the string a
    /// backslash before the active quote character yields the quote itself;
    /// other escape sequences are kept verbatim.
    pub fn read_string(&mut self) -> Result<Option<String>, ReaderError> {
        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => return Ok(None),
        };
        let start = self.position();
        self.advance();

        let mut value = String::new();
        loop {
            match self.advance() {
                None => return Err(ReaderError::UnterminatedString { position: start }),
                Some('\\') => match self.peek() {
                    Some(c) if c == quote => {
                        self.advance();
                        value.push(c);
                    }
                    Some('\\') => {
                        self.advance();
                        value.push_str("\\\\");
                    }
                    _ => value.push('\\'),
                },
                Some(c) if c == quote => return Ok(Some(value)),
                Some(c) => value.push(c),
            }
        }
    }

    /// Read up to the first character of `breaks` found outside brackets and quotes.
    ///
    /// The break character itself is not consumed. A closing bracket without
    /// its opener, or input ending inside a bracket, is an error.
    pub fn read_expression(&mut self, breaks: &[char]) -> Result<&'a str, ReaderError> {
        let start = self.cursor;
        let mut open: Vec<(char, Position)> = Vec::new();

        while let Some(c) = self.peek() {
            if open.is_empty() && breaks.contains(&c) {
                break;
            }
            match c {
                '"' | '\'' => {
                    self.read_string()?;
                }
                '\\' => {
                    self.advance();
                    self.advance();
                }
                '(' | '[' | '{' => {
                    open.push((c, self.position()));
                    self.advance();
                }
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match open.pop() {
                        Some((opener, _)) if opener == expected => {
                            self.advance();
                        }
                        _ => {
                            return Err(ReaderError::UnbalancedBrackets {
                                bracket: c,
                                position: self.position(),
                            });
                        }
                    }
                }
                _ => {
                    self.advance();
                }
            }
        }

        if let Some((bracket, position)) = open.pop() {
            return Err(ReaderError::UnbalancedBrackets { bracket, position });
        }
        Ok(self.slice_from(start))
    }
}
