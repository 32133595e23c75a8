use crate::parser::token::Position;
use std::fmt;
use std::path::{Path, PathBuf};

/// Kind of diagnostic, grouped by the pipeline stage that raises it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    // Lexing
    MixedIndentation,
    InconsistentIndentation,
    UnbalancedBrackets,
    UnterminatedString,
    UnexpectedCharacter,
    InvalidSyntax,

    // Parsing
    UnexpectedIndent,
    StrayOutdent,
    MisplacedAttribute,
    UnexpectedToken,

    // Compiling
    ImportNotFound,
    MultipleExtends,
    UndefinedMixin,
    DepthExceeded,
    UnknownFilter,
    VoidElementWithContent,
    OrphanBranch,
    InvalidInterpolation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MixedIndentation => "Mixed indentation",
            ErrorKind::InconsistentIndentation => "Inconsistent indentation",
            ErrorKind::UnbalancedBrackets => "Unbalanced brackets",
            ErrorKind::UnterminatedString => "Unterminated string",
            ErrorKind::UnexpectedCharacter => "Unexpected character",
            ErrorKind::InvalidSyntax => "Invalid syntax",
            ErrorKind::UnexpectedIndent => "Unexpected indentation",
            ErrorKind::StrayOutdent => "Stray outdent",
            ErrorKind::MisplacedAttribute => "Misplaced attribute",
            ErrorKind::UnexpectedToken => "Unexpected token",
            ErrorKind::ImportNotFound => "Import not found",
            ErrorKind::MultipleExtends => "Multiple extends",
            ErrorKind::UndefinedMixin => "Undefined mixin",
            ErrorKind::DepthExceeded => "Nesting depth exceeded",
            ErrorKind::UnknownFilter => "Unknown filter",
            ErrorKind::VoidElementWithContent => "Void element with content",
            ErrorKind::OrphanBranch => "Orphan branch",
            ErrorKind::InvalidInterpolation => "Invalid interpolation",
        }
    }
}

/// Positioned message shared by lex, parse and compile errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub position: Position,
    /// Template the error originated in, when it is not the one being compiled
    pub path: Option<PathBuf>,
    pub help: Option<String>,
}

impl Diagnostic {
    pub fn new(kind: ErrorKind, message: impl Into<String>, position: Position) -> Self {
        Self {
            kind,
            message: message.into(),
            position,
            path: None,
            help: None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (line {}, offset {})",
            self.kind.as_str(),
            self.message,
            self.position.line,
            self.position.offset
        )?;
        if let Some(path) = &self.path {
            write!(f, " in {}", path.display())?;
        }
        Ok(())
    }
}

/// Error raised by any stage of the compile pipeline
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("lex error: {0}")]
    Lex(Diagnostic),
    #[error("parse error: {0}")]
    Parse(Diagnostic),
    #[error("compile error: {0}")]
    Compile(Diagnostic),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn lex(kind: ErrorKind, message: impl Into<String>, position: Position) -> Self {
        Error::Lex(Diagnostic::new(kind, message, position))
    }

    pub fn parse(kind: ErrorKind, message: impl Into<String>, position: Position) -> Self {
        Error::Parse(Diagnostic::new(kind, message, position))
    }

    pub fn compile(kind: ErrorKind, message: impl Into<String>, position: Position) -> Self {
        Error::Compile(Diagnostic::new(kind, message, position))
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Error::Lex(d) | Error::Parse(d) | Error::Compile(d) => Some(d),
            Error::Io { .. } => None,
        }
    }

    fn diagnostic_mut(&mut self) -> Option<&mut Diagnostic> {
        match self {
            Error::Lex(d) | Error::Parse(d) | Error::Compile(d) => Some(d),
            Error::Io { .. } => None,
        }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        self.diagnostic().map(|d| d.kind)
    }

    pub fn position(&self) -> Option<Position> {
        self.diagnostic().map(|d| d.position)
    }

    /// Add help text
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        if let Some(d) = self.diagnostic_mut() {
            d.help = Some(help.into());
        }
        self
    }

    /// Attribute the error to `path` unless a nested template already claimed it
    pub fn in_file(mut self, path: Option<&Path>) -> Self {
        if let (Some(d), Some(path)) = (self.diagnostic_mut(), path) {
            if d.path.is_none() {
                d.path = Some(path.to_path_buf());
            }
        }
        self
    }

    /// Render the error with source context
    pub fn render(&self, source: &str, filename: &str) -> String {
        self.render_inner(source, filename, false)
    }

    /// Render the error with ANSI color codes
    pub fn render_color(&self, source: &str, filename: &str) -> String {
        self.render_inner(source, filename, true)
    }

    fn render_inner(&self, source: &str, filename: &str, color: bool) -> String {
        let red = if color { "\x1b[1;31m" } else { "" };
        let dim = if color { "\x1b[2m" } else { "" };
        let cyan = if color { "\x1b[1;38;5;73m" } else { "" };
        let reset = if color { "\x1b[0m" } else { "" };

        let Some(diagnostic) = self.diagnostic() else {
            return format!("\n{}error:{} {}\n\n", red, reset, self);
        };

        // Errors from included templates point into that file, not the caller's source
        let nested_source;
        let (source, filename) = match &diagnostic.path {
            Some(path) => {
                nested_source = std::fs::read_to_string(path).unwrap_or_default();
                (nested_source.as_str(), path.to_string_lossy().into_owned())
            }
            None => (source, filename.to_string()),
        };

        let mut output = String::new();
        output.push('\n');

        let line = diagnostic.position.line;
        let col = diagnostic.position.offset + 1;
        output.push_str(&format!(" {}file:{} {}:{}:{}\n", dim, reset, filename, line, col));
        output.push_str(&format!(
            "{}error:{} {}: {}\n",
            red,
            reset,
            diagnostic.kind.as_str(),
            diagnostic.message
        ));

        if let Some(source_line) = line.checked_sub(1).and_then(|i| source.lines().nth(i)) {
            let width = format!("{}", line).len().max(2);
            output.push_str(&format!("{}{:>width$} |{}\n", dim, "", reset, width = width));
            output.push_str(&format!(
                "{}{:>width$} |{} {}\n",
                dim,
                line,
                reset,
                source_line,
                width = width
            ));

            let spaces = " ".repeat(diagnostic.position.offset);
            output.push_str(&format!(
                "{}{:>width$} |{} {}{}^{}\n",
                dim,
                "",
                reset,
                spaces,
                red,
                reset,
                width = width
            ));
        }

        if let Some(help) = &diagnostic.help {
            output.push('\n');
            for (i, help_line) in help.lines().enumerate() {
                if i == 0 {
                    output.push_str(&format!(" {}help:{} {}\n", cyan, reset, help_line));
                } else {
                    output.push_str(&format!("       {}\n", help_line));
                }
            }
        }

        output.push('\n');
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_points_at_offset() {
        let source = "div\n  p(class=\"a\"\n";
        let err = Error::lex(
            ErrorKind::UnbalancedBrackets,
            "attribute list is never closed",
            Position::new(2, 3),
        )
        .with_help("close the list with `)`");

        let rendered = err.render(source, "page.jade");
        assert!(rendered.contains("page.jade:2:4"));
        assert!(rendered.contains("Unbalanced brackets: attribute list is never closed"));
        assert!(rendered.contains(" 2 |   p(class=\"a\""));
        assert!(rendered.contains("   |    ^"));
        assert!(rendered.contains("help: close the list with `)`"));
    }

    #[test]
    fn test_in_file_keeps_innermost_path() {
        let err = Error::compile(ErrorKind::UndefinedMixin, "no mixin `card`", Position::new(1, 0))
            .in_file(Some(Path::new("partials/card.jade")))
            .in_file(Some(Path::new("index.jade")));

        let path = err.diagnostic().and_then(|d| d.path.clone());
        assert_eq!(path, Some(PathBuf::from("partials/card.jade")));
    }

    #[test]
    fn test_display_includes_position() {
        let err = Error::parse(ErrorKind::StrayOutdent, "outdent past the document root", Position::new(4, 0));
        assert_eq!(
            err.to_string(),
            "parse error: Stray outdent: outdent past the document root (line 4, offset 0)"
        );
    }
}
