//! Minimal syntactic classification of PHP expression fragments.
//!
//! Expressions are passed through untouched except for two questions the
//! emitter has to answer: is this a literal whose text can be written out at
//! compile time, and is this a plain variable reference that may be wrapped in
//! an existence guard.

use crate::error::{Error, ErrorKind};
use crate::parser::{Position, Reader};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref VARIABLE: Regex =
        Regex::new(r"^\$[A-Za-z_]\w*(\[[^\]]*\]|->[A-Za-z_]\w*)*$").unwrap();
    static ref BAREWORD: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
    static ref NUMBER: Regex = Regex::new(r"^-?\d+(\.\d+)?$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    /// Quoted string or bareword, with quotes removed
    Literal(String),
    Bool(bool),
    Null,
    Number(&'a str),
    Variable(&'a str),
    Expression(&'a str),
}

pub fn classify(value: &str) -> Value<'_> {
    let value = value.trim();
    if let Some(literal) = quoted(value) {
        return Value::Literal(literal);
    }
    match value.to_ascii_lowercase().as_str() {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        "null" => return Value::Null,
        _ => {}
    }
    if NUMBER.is_match(value) {
        Value::Number(value)
    } else if VARIABLE.is_match(value) {
        Value::Variable(value)
    } else if BAREWORD.is_match(value) {
        Value::Literal(value.to_string())
    } else {
        Value::Expression(value)
    }
}

/// Contents of `value` if the whole of it is a single quoted string
fn quoted(value: &str) -> Option<String> {
    let mut reader = Reader::new(value);
    match reader.read_string() {
        Ok(Some(text)) if reader.is_at_end() => Some(text),
        _ => None,
    }
}

pub fn is_variable(value: &str) -> bool {
    VARIABLE.is_match(value.trim())
}

/// `isset(X) ? X : ''` for variable references, anything else unchanged
pub fn guard(value: &str, quote: char) -> String {
    let value = value.trim();
    if is_variable(value) {
        format!("isset({value}) ? {value} : {quote}{quote}")
    } else {
        value.to_string()
    }
}

/// PHP string literal for `text`
pub fn code_string(text: &str, quote: char) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(quote);
    for c in text.chars() {
        if c == quote || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push(quote);
    out
}

/// `value` as PHP code: literals are requoted, everything else is kept
pub fn code_value(value: &str, quote: char) -> String {
    match classify(value) {
        Value::Literal(text) => code_string(&text, quote),
        _ => value.trim().to_string(),
    }
}

/// Piece of interpolated text
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Text(String),
    /// `#{expr}` (escaped) or `!{expr}`
    Expression { value: String, escaped: bool },
    /// `#[tag ...]` inline template snippet
    Tag(String),
}

/// Split text on `#{...}`, `!{...}` and `#[...]`; a backslash keeps the sequence literal
pub fn interpolate(text: &str, position: Position) -> Result<Vec<Segment>, Error> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut reader = Reader::starting_at(text, position);

    while let Some(c) = reader.peek() {
        let opener = reader.peek_nth(1);
        match (c, opener) {
            ('\\', Some('#' | '!')) if matches!(reader.peek_nth(2), Some('{' | '[')) => {
                reader.advance();
                literal.extend(reader.advance());
            }
            ('#' | '!', Some('{')) | ('#', Some('[')) => {
                let start = reader.position();
                reader.advance();
                reader.advance();
                let close = if opener == Some('{') { '}' } else { ']' };
                let inner = reader.read_expression(&[close])?;
                if !reader.consume(&close.to_string()) {
                    return Err(Error::compile(
                        ErrorKind::InvalidInterpolation,
                        format!("interpolation is missing its closing `{close}`"),
                        start,
                    ));
                }
                let inner = inner.trim();
                if inner.is_empty() {
                    return Err(Error::compile(
                        ErrorKind::InvalidInterpolation,
                        "empty interpolation",
                        start,
                    ));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut literal)));
                }
                segments.push(match (c, close) {
                    (_, ']') => Segment::Tag(inner.to_string()),
                    ('#', _) => Segment::Expression { value: inner.to_string(), escaped: true },
                    _ => Segment::Expression { value: inner.to_string(), escaped: false },
                });
            }
            _ => {
                literal.extend(reader.advance());
            }
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Text(literal));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify("'a b'"), Value::Literal("a b".into()));
        assert_eq!(classify("\"it\\\"s\""), Value::Literal("it\"s".into()));
        assert_eq!(classify("btn-primary"), Value::Literal("btn-primary".into()));
        assert_eq!(classify("true"), Value::Bool(true));
        assert_eq!(classify("FALSE"), Value::Bool(false));
        assert_eq!(classify("null"), Value::Null);
        assert_eq!(classify("42"), Value::Number("42"));
        assert_eq!(classify("$user->name"), Value::Variable("$user->name"));
        assert_eq!(classify("$items['a'][0]"), Value::Variable("$items['a'][0]"));
        assert_eq!(classify("'a' . $b"), Value::Expression("'a' . $b"));
        assert_eq!(classify("count($items)"), Value::Expression("count($items)"));
    }

    #[test]
    fn test_guard_only_wraps_variables() {
        assert_eq!(guard("$title", '\''), "isset($title) ? $title : ''");
        assert_eq!(guard("strtoupper($t)", '\''), "strtoupper($t)");
    }

    #[test]
    fn test_code_value() {
        assert_eq!(code_value("primary", '\''), "'primary'");
        assert_eq!(code_value("\"it's\"", '\''), "'it\\'s'");
        assert_eq!(code_value("$x + 1", '\''), "$x + 1");
        assert_eq!(code_value("12", '\''), "12");
    }

    #[test]
    fn test_interpolate() {
        let segments = interpolate("Hi #{$name}, see !{$link} #[em now]", Position::new(1, 0)).unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text("Hi ".into()),
                Segment::Expression { value: "$name".into(), escaped: true },
                Segment::Text(", see ".into()),
                Segment::Expression { value: "$link".into(), escaped: false },
                Segment::Text(" ".into()),
                Segment::Tag("em now".into()),
            ]
        );
    }

    #[test]
    fn test_interpolate_escaped_and_nested() {
        let segments = interpolate("\\#{literal} #{$a['}']}", Position::new(1, 0)).unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Text("#{literal} ".into()),
                Segment::Expression { value: "$a['}']".into(), escaped: true },
            ]
        );
        assert_eq!(interpolate("# plain !", Position::new(1, 0)).unwrap(), vec![Segment::Text("# plain !".into())]);
    }

    #[test]
    fn test_interpolate_unclosed() {
        let err = interpolate("a #{$b", Position::new(3, 2)).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidInterpolation));
        assert_eq!(err.position(), Some(Position::new(3, 4)));
    }
}
