use crate::error::{Error, ErrorKind};
use crate::parser::reader::Reader;
use crate::parser::token::{BlockMode, ConditionKind, ImportKind, Position, Token, TokenKind};
use std::collections::VecDeque;

/// Indentation-aware tokenizer.
///
/// Tokens are produced lazily, one source line at a time. The sequence can be
/// abandoned at any point; lexing again means building a new `Lexer`.
pub struct Lexer<'a> {
    reader: Reader<'a>,
    /// Indentation character fixed by the first indented line
    indent_char: Option<char>,
    /// Widths of the currently open indentation levels, outermost first
    levels: Vec<usize>,
    /// Indentation width of the line being lexed
    line_width: usize,
    pending: VecDeque<Token>,
    finished: bool,
}

/// Tokenize a whole template
pub fn tokenize(source: &str) -> Result<Vec<Token>, Error> {
    Lexer::new(source).collect()
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            reader: Reader::new(source),
            indent_char: None,
            levels: vec![0],
            line_width: 0,
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn push(&mut self, kind: TokenKind, position: Position) {
        self.pending.push_back(Token::new(kind, position));
    }

    fn error(&self, kind: ErrorKind, message: impl Into<String>) -> Error {
        Error::lex(kind, message, self.reader.position())
    }

    fn current_level(&self) -> usize {
        self.levels.last().copied().unwrap_or(0)
    }

    // === Lines and indentation ===

    /// Lex the next non-blank line into `pending`, or close all levels at the end of input
    fn lex_line(&mut self) -> Result<(), Error> {
        loop {
            if self.reader.is_at_end() {
                let position = self.reader.position();
                while self.levels.len() > 1 {
                    self.levels.pop();
                    self.push(TokenKind::Outdent, position);
                }
                self.finished = true;
                return Ok(());
            }

            let position = self.reader.position();
            let indentation = self.reader.read_spaces();

            // Blank lines never affect nesting
            if self.reader.is_at_line_end() {
                self.reader.read_new_line();
                continue;
            }

            let width = self.measure(indentation, position)?;
            self.indent_to(width, position)?;
            self.line_width = width;

            self.lex_content()?;
            return self.end_line();
        }
    }

    fn measure(&mut self, indentation: &str, position: Position) -> Result<usize, Error> {
        if let Some(first) = indentation.chars().next() {
            let style = *self.indent_char.get_or_insert(first);
            if indentation.chars().any(|c| c != style) {
                let expected = if style == '\t' { "tabs" } else { "spaces" };
                return Err(Error::lex(
                    ErrorKind::MixedIndentation,
                    format!("mixed indentation, this template is indented with {expected}"),
                    position,
                )
                .with_help(format!("indent every line with {expected} only")));
            }
        }
        Ok(indentation.chars().count())
    }

    fn indent_to(&mut self, width: usize, position: Position) -> Result<(), Error> {
        if width > self.current_level() {
            self.levels.push(width);
            self.push(TokenKind::Indent, position);
        } else if width < self.current_level() {
            while self.current_level() > width {
                self.levels.pop();
                self.push(TokenKind::Outdent, position);
            }
            if self.current_level() != width {
                return Err(Error::lex(
                    ErrorKind::InconsistentIndentation,
                    "indentation does not match any outer level",
                    position,
                ));
            }
        }
        Ok(())
    }

    fn end_line(&mut self) -> Result<(), Error> {
        self.reader.read_spaces();
        if let Some(c) = self.reader.peek().filter(|&c| c != '\n' && c != '\r') {
            return Err(self.error(ErrorKind::UnexpectedCharacter, format!("unexpected `{c}`")));
        }
        let position = self.reader.position();
        self.push(TokenKind::NewLine, position);
        self.reader.read_new_line();
        Ok(())
    }

    /// Consume the lines indented deeper than the current line as raw text.
    ///
    /// The lines are stripped of their common indentation and joined with `\n`.
    /// Leaves the reader at the end of the last consumed line.
    fn read_raw_block(&mut self) -> Option<String> {
        let mut lines: Vec<&'a str> = Vec::new();
        let mut blanks = 0;
        let mut last_end = self.reader.checkpoint();

        loop {
            if !self.reader.read_new_line() {
                break;
            }
            let line = self.reader.read_until_new_line();
            let content = line.trim_start_matches([' ', '\t']);
            if content.trim().is_empty() {
                blanks += 1;
                continue;
            }
            if line.len() - content.len() <= self.line_width {
                break;
            }
            lines.extend(std::iter::repeat_n("", blanks));
            blanks = 0;
            lines.push(line);
            last_end = self.reader.checkpoint();
        }
        self.reader.rewind(last_end);

        let strip = lines
            .iter()
            .filter(|line| !line.is_empty())
            .map(|line| line.len() - line.trim_start_matches([' ', '\t']).len())
            .min()?;
        let stripped: Vec<&str> = lines
            .iter()
            .map(|line| if line.is_empty() { "" } else { &line[strip..] })
            .collect();
        Some(stripped.join("\n"))
    }

    // === Line content ===

    /// Keyword at the cursor, followed by whitespace, end of line or one of `also`
    fn at_keyword(&self, word: &str, also: &[char]) -> bool {
        if !self.reader.starts_with(word) {
            return false;
        }
        match self.reader.remainder()[word.len()..].chars().next() {
            None | Some(' ' | '\t' | '\n' | '\r') => true,
            Some(c) => also.contains(&c),
        }
    }

    fn lex_content(&mut self) -> Result<(), Error> {
        let position = self.reader.position();
        let Some(c) = self.reader.peek() else {
            return Ok(());
        };

        match c {
            '/' if self.reader.starts_with("//") => return self.lex_comment(),
            '!' if self.reader.starts_with("!!!") => {
                self.reader.consume("!!!");
                return self.lex_doctype(position);
            }
            '|' => {
                self.reader.advance();
                if self.reader.peek() == Some(' ') {
                    self.reader.advance();
                }
                let value = self.reader.read_until_new_line().to_string();
                self.push(TokenKind::Text { value }, position);
                return Ok(());
            }
            '<' => {
                let value = self.reader.read_until_new_line().to_string();
                self.push(TokenKind::Text { value }, position);
                return Ok(());
            }
            '#' | '!' if ["#{", "#[", "!{"].iter().any(|open| self.reader.starts_with(open)) => {
                let value = self.reader.read_until_new_line().to_string();
                self.push(TokenKind::Text { value }, position);
                return Ok(());
            }
            ':' => return self.lex_filter(),
            '+' => return self.lex_mixin_call(),
            '-' => return self.lex_code(),
            '=' | '!' | '?' => return self.lex_expression(),
            '$' => return self.lex_variable(),
            '.' | '#' => {
                self.push(TokenKind::Tag { name: "div".to_string() }, position);
                return self.lex_tag_tail();
            }
            c if c.is_ascii_alphabetic() || c == '_' => {}
            c => {
                return Err(self.error(
                    ErrorKind::UnexpectedCharacter,
                    format!("unexpected `{c}` at the start of a line"),
                ));
            }
        }

        if self.at_keyword("doctype", &[]) {
            self.reader.consume("doctype");
            self.lex_doctype(position)
        } else if self.at_keyword("extends", &[]) {
            self.reader.consume("extends");
            let path = self.read_path()?;
            let kind = TokenKind::Import { kind: ImportKind::Extends, path, filter: None };
            self.push(kind, position);
            Ok(())
        } else if self.at_keyword("include", &[':']) {
            self.reader.consume("include");
            let filter = if self.reader.consume(":") {
                Some(self.read_required_name("filter name")?)
            } else {
                None
            };
            let path = self.read_path()?;
            let kind = TokenKind::Import { kind: ImportKind::Include, path, filter };
            self.push(kind, position);
            Ok(())
        } else if self.at_keyword("block", &[]) {
            self.reader.consume("block");
            self.reader.read_spaces();
            let mode = if self.at_keyword("append", &[]) {
                self.reader.consume("append");
                Some(BlockMode::Append)
            } else if self.at_keyword("prepend", &[]) {
                self.reader.consume("prepend");
                Some(BlockMode::Prepend)
            } else if self.at_keyword("replace", &[]) {
                self.reader.consume("replace");
                Some(BlockMode::Replace)
            } else {
                None
            };
            self.lex_block(mode, position)
        } else if self.at_keyword("append", &[]) {
            self.reader.consume("append");
            self.lex_block(Some(BlockMode::Append), position)
        } else if self.at_keyword("prepend", &[]) {
            self.reader.consume("prepend");
            self.lex_block(Some(BlockMode::Prepend), position)
        } else if self.at_keyword("if", &['(']) {
            self.reader.consume("if");
            self.lex_conditional(ConditionKind::If, position)
        } else if self.at_keyword("unless", &['(']) {
            self.reader.consume("unless");
            self.lex_conditional(ConditionKind::Unless, position)
        } else if self.at_keyword("elseif", &['(']) {
            self.reader.consume("elseif");
            self.lex_conditional(ConditionKind::ElseIf, position)
        } else if self.at_keyword("else", &[]) {
            self.reader.consume("else");
            self.reader.read_spaces();
            if self.at_keyword("if", &['(']) {
                self.reader.consume("if");
                self.lex_conditional(ConditionKind::ElseIf, position)
            } else {
                self.push(TokenKind::Conditional { kind: ConditionKind::Else, subject: None }, position);
                Ok(())
            }
        } else if self.at_keyword("case", &[]) {
            self.reader.consume("case");
            let subject = self.read_subject("case")?;
            self.push(TokenKind::Case { subject }, position);
            Ok(())
        } else if self.at_keyword("when", &[]) {
            self.reader.consume("when");
            self.lex_when(position)
        } else if self.at_keyword("default", &[':']) {
            self.reader.consume("default");
            self.push(TokenKind::When { subject: None }, position);
            self.lex_expansion()
        } else if self.at_keyword("each", &[]) {
            self.reader.consume("each");
            self.lex_each(position)
        } else if self.at_keyword("while", &['(']) {
            self.reader.consume("while");
            let subject = self.read_subject("while")?;
            self.push(TokenKind::While { subject }, position);
            Ok(())
        } else if self.at_keyword("do", &[]) {
            self.reader.consume("do");
            self.push(TokenKind::Do, position);
            Ok(())
        } else if self.at_keyword("for", &['(']) {
            self.reader.consume("for");
            let subject = self.read_subject("for")?;
            self.push(TokenKind::For { subject }, position);
            Ok(())
        } else if self.at_keyword("mixin", &[]) {
            self.reader.consume("mixin");
            self.reader.read_spaces();
            let name = self.read_required_name("mixin name")?;
            self.push(TokenKind::Mixin { name }, position);
            if self.reader.peek() == Some('(') {
                self.lex_attributes()?;
            }
            Ok(())
        } else {
            let name = self.read_tag_name();
            self.push(TokenKind::Tag { name }, position);
            self.lex_tag_tail()
        }
    }

    // === Keywords ===

    fn lex_doctype(&mut self, position: Position) -> Result<(), Error> {
        self.reader.read_spaces();
        let name = self.reader.read_until_new_line().trim();
        let name = if name.is_empty() { "html" } else { name };
        self.push(TokenKind::Doctype { name: name.to_string() }, position);
        Ok(())
    }

    fn lex_block(&mut self, mode: Option<BlockMode>, position: Position) -> Result<(), Error> {
        self.reader.read_spaces();
        let name = self.reader.read_until_new_line().trim();
        if name.is_empty() && mode.is_some() {
            return Err(self.error(ErrorKind::InvalidSyntax, "expected a block name"));
        }
        let name = (!name.is_empty()).then(|| name.to_string());
        self.push(TokenKind::Block { name, mode: mode.unwrap_or_default() }, position);
        Ok(())
    }

    fn lex_conditional(&mut self, kind: ConditionKind, position: Position) -> Result<(), Error> {
        let keyword = match kind {
            ConditionKind::If => "if",
            ConditionKind::ElseIf => "else if",
            ConditionKind::Unless => "unless",
            ConditionKind::Else => "else",
        };
        let subject = self.read_subject(keyword)?;
        self.push(TokenKind::Conditional { kind, subject: Some(subject) }, position);
        Ok(())
    }

    fn lex_when(&mut self, position: Position) -> Result<(), Error> {
        self.reader.read_spaces();
        let start = self.reader.checkpoint();
        loop {
            self.reader.read_expression(&[':', '\n', '\r'])?;
            // `Foo::BAR` is part of the subject, a single colon starts an expansion
            if self.reader.starts_with("::") {
                self.reader.consume("::");
                continue;
            }
            break;
        }
        let subject = self.reader.slice_from(start).trim();
        if subject.is_empty() {
            return Err(self.error(ErrorKind::InvalidSyntax, "`when` needs a value to match"));
        }
        self.push(TokenKind::When { subject: Some(subject.to_string()) }, position);
        self.lex_expansion()
    }

    /// `: content` after a keyword or tag nests the rest of the line
    fn lex_expansion(&mut self) -> Result<(), Error> {
        if self.reader.peek() != Some(':') {
            return Ok(());
        }
        let position = self.reader.position();
        self.reader.advance();
        self.reader.read_spaces();
        if self.reader.is_at_line_end() {
            return Ok(());
        }
        self.push(TokenKind::Expansion, position);
        self.lex_content()
    }

    fn lex_each(&mut self, position: Position) -> Result<(), Error> {
        let source = self.read_subject("each")?;
        let invalid = || {
            Error::lex(
                ErrorKind::InvalidSyntax,
                format!("malformed each `{source}`"),
                position,
            )
            .with_help("write `each $item in $items` or `each $item, $key in $items`")
        };

        let (names, subject) = source.split_once(" in ").ok_or_else(invalid)?;
        let mut names = names.split(',').map(str::trim);
        let item = names.next().and_then(variable_name).ok_or_else(invalid)?;
        let key = match names.next() {
            Some(name) => Some(variable_name(name).ok_or_else(invalid)?),
            None => None,
        };
        let subject = subject.trim();
        if names.next().is_some() || subject.is_empty() {
            return Err(invalid());
        }

        let kind = TokenKind::Each { item, key, subject: subject.to_string() };
        self.push(kind, position);
        Ok(())
    }

    fn lex_comment(&mut self) -> Result<(), Error> {
        let position = self.reader.position();
        self.reader.consume("//");
        let rendered = !self.reader.consume("-");
        let first = self.reader.read_until_new_line().trim();
        let block = self.read_raw_block();

        let content = match (first.is_empty(), block) {
            (_, None) => first.to_string(),
            (true, Some(block)) => block,
            (false, Some(block)) => format!("{first}\n{block}"),
        };
        self.push(TokenKind::Comment { content, rendered }, position);
        Ok(())
    }

    fn lex_filter(&mut self) -> Result<(), Error> {
        let position = self.reader.position();
        self.reader.advance();
        let name = self.read_required_name("filter name")?;
        self.push(TokenKind::Filter { name }, position);
        if self.reader.peek() == Some('(') {
            self.lex_attributes()?;
        }

        self.reader.read_spaces();
        let text_position = self.reader.position();
        let inline = self.reader.read_until_new_line().trim_end();
        let value = match (inline.is_empty(), self.read_raw_block()) {
            (true, None) => return Ok(()),
            (false, None) => inline.to_string(),
            (true, Some(block)) => block,
            (false, Some(block)) => format!("{inline}\n{block}"),
        };
        self.push(TokenKind::Text { value }, text_position);
        Ok(())
    }

    fn lex_mixin_call(&mut self) -> Result<(), Error> {
        let position = self.reader.position();
        self.reader.advance();
        let name = self.read_required_name("mixin name")?;
        self.push(TokenKind::MixinCall { name }, position);
        self.lex_tag_tail()
    }

    fn lex_code(&mut self) -> Result<(), Error> {
        let position = self.reader.position();
        match self.reader.peek_nth(1) {
            None | Some(' ' | '\t' | '\n' | '\r') => {}
            Some(c) => {
                return Err(self.error(ErrorKind::UnexpectedCharacter, format!("unexpected `-{c}`"))
                    .with_help("code lines start with `- ` followed by a space"));
            }
        }
        self.reader.advance();
        self.reader.read_spaces();
        let value = self.reader.read_until_new_line().trim_end();

        if value.is_empty() {
            if let Some(block) = self.read_raw_block() {
                self.push(TokenKind::Code { value: block, block: true }, position);
            }
            return Ok(());
        }
        self.push(TokenKind::Code { value: value.to_string(), block: false }, position);
        Ok(())
    }

    fn lex_expression(&mut self) -> Result<(), Error> {
        let position = self.reader.position();
        let (escaped, checked) = if self.reader.consume("?!=") || self.reader.consume("!?=") {
            (false, false)
        } else if self.reader.consume("!=") {
            (false, true)
        } else if self.reader.consume("?=") {
            (true, false)
        } else if self.reader.consume("=") {
            (true, true)
        } else {
            let c = self.reader.peek().unwrap_or(' ');
            return Err(self.error(ErrorKind::UnexpectedCharacter, format!("unexpected `{c}`")));
        };

        let value = self.read_subject("expression")?;
        self.push(TokenKind::Expression { value, escaped, checked }, position);
        Ok(())
    }

    fn lex_variable(&mut self) -> Result<(), Error> {
        let position = self.reader.position();
        self.reader.advance();
        let name = self.reader.read_while(is_identifier_char);
        self.reader.read_spaces();
        if name.is_empty() || !self.reader.starts_with("=") || self.reader.starts_with("==") {
            return Err(Error::lex(
                ErrorKind::InvalidSyntax,
                "expected a variable assignment",
                position,
            )
            .with_help("assign with `$name = value`, or output with `= $name`"));
        }
        let name = format!("${name}");
        self.reader.advance();
        let value = self.read_subject("assignment")?;
        self.push(TokenKind::Variable { name, value }, position);
        Ok(())
    }

    // === Tags ===

    fn read_tag_name(&mut self) -> String {
        let start = self.reader.checkpoint();
        loop {
            self.reader.read_while(is_name_char);
            // Namespaced tags (`svg:path`), but not `a: ...` expansions
            let namespaced = self.reader.peek() == Some(':')
                && self.reader.peek_nth(1).is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
            if !namespaced {
                break;
            }
            self.reader.advance();
        }
        self.reader.slice_from(start).to_string()
    }

    /// Shorthands, attribute lists and trailing content after a tag or mixin call
    fn lex_tag_tail(&mut self) -> Result<(), Error> {
        loop {
            let position = self.reader.position();
            let next_is_name = self.reader.peek_nth(1).is_some_and(is_name_char);
            match self.reader.peek() {
                Some('.') if next_is_name => {
                    self.reader.advance();
                    let name = self.reader.read_while(is_name_char).to_string();
                    self.push(TokenKind::Class { name }, position);
                }
                Some('#') if next_is_name => {
                    self.reader.advance();
                    let name = self.reader.read_while(is_name_char).to_string();
                    self.push(TokenKind::Id { name }, position);
                }
                Some('(') => self.lex_attributes()?,
                Some('&') => {
                    self.reader.advance();
                    let name = self.read_required_name("assignment name")?;
                    self.push(TokenKind::Assignment { name }, position);
                    if self.reader.peek() != Some('(') {
                        return Err(self.error(ErrorKind::InvalidSyntax, "expected `(` after assignment"));
                    }
                    self.lex_attributes()?;
                }
                _ => break,
            }
        }

        let position = self.reader.position();
        match self.reader.peek() {
            None | Some('\n' | '\r') => Ok(()),
            Some('/') => {
                self.reader.advance();
                self.push(TokenKind::SelfClosing, position);
                Ok(())
            }
            Some('.') => {
                self.reader.advance();
                self.reader.read_spaces();
                if !self.reader.is_at_line_end() {
                    return Err(self.error(
                        ErrorKind::UnexpectedCharacter,
                        "a text block `.` must end the line",
                    ));
                }
                if let Some(value) = self.read_raw_block() {
                    self.push(TokenKind::Text { value }, position);
                }
                Ok(())
            }
            Some(':') => self.lex_expansion(),
            Some('=' | '!' | '?') => self.lex_expression(),
            Some(' ' | '\t') => {
                self.reader.read_spaces();
                let position = self.reader.position();
                let value = self.reader.read_until_new_line();
                if !value.is_empty() {
                    self.push(TokenKind::Text { value: value.to_string() }, position);
                }
                Ok(())
            }
            Some(c) => Err(self.error(ErrorKind::UnexpectedCharacter, format!("unexpected `{c}`"))),
        }
    }

    // === Attribute lists ===

    fn lex_attributes(&mut self) -> Result<(), Error> {
        let start = self.reader.position();
        self.reader.advance();
        self.push(TokenKind::AttributeStart, start);

        loop {
            self.reader.read_while(|c| c.is_whitespace() || c == ',');
            match self.reader.peek() {
                None => {
                    return Err(Error::lex(
                        ErrorKind::UnbalancedBrackets,
                        "attribute list is never closed",
                        start,
                    )
                    .with_help("close the list with `)`"));
                }
                Some(')') => {
                    let position = self.reader.position();
                    self.reader.advance();
                    self.push(TokenKind::AttributeEnd, position);
                    return Ok(());
                }
                Some(_) => self.lex_attribute()?,
            }
        }
    }

    fn lex_attribute(&mut self) -> Result<(), Error> {
        let position = self.reader.position();
        let mark = self.reader.checkpoint();
        let name = self.reader.read_while(is_attribute_name_char);
        self.reader.read_spaces();

        if !name.is_empty() {
            if let Some((escaped, checked)) = self.read_attribute_operator() {
                self.reader.read_while(char::is_whitespace);
                let value = self.read_attribute_value()?;
                let kind = TokenKind::Attribute {
                    name: Some(name.to_string()),
                    value: Some(value),
                    escaped,
                    checked,
                };
                self.push(kind, position);
                return Ok(());
            }
        }

        // Bare value: boolean attribute, positional argument or parameter
        self.reader.rewind(mark);
        let raw = self.reader.read_expression(&[',', ')'])?.trim();
        let words: Vec<&str> = raw.split_whitespace().collect();
        let values = if words.len() > 1 && words.iter().all(|w| is_plain_name(w)) {
            words
        } else {
            vec![raw]
        };
        for value in values {
            let kind = TokenKind::Attribute {
                name: None,
                value: Some(value.to_string()),
                escaped: true,
                checked: true,
            };
            self.push(kind, position);
        }
        Ok(())
    }

    /// `=`, `!=` (unescaped), `?=` (unchecked) or `?!=`; returns `(escaped, checked)`
    fn read_attribute_operator(&mut self) -> Option<(bool, bool)> {
        const OPERATORS: [(&str, bool, bool); 5] = [
            ("?!=", false, false),
            ("!?=", false, false),
            ("!=", false, true),
            ("?=", true, false),
            ("=", true, true),
        ];
        for (op, escaped, checked) in OPERATORS {
            let rest = self.reader.remainder();
            if rest.starts_with(op) && !rest[op.len()..].starts_with('=') {
                self.reader.consume(op);
                return Some((escaped, checked));
            }
        }
        None
    }

    fn read_attribute_value(&mut self) -> Result<String, Error> {
        let mark = self.reader.checkpoint();
        if matches!(self.reader.peek(), Some('"' | '\'')) {
            self.reader.read_string()?;
            let end = self.reader.checkpoint();
            self.reader.read_spaces();
            // A lone literal may be followed by the next attribute without a comma
            let literal_ends = match self.reader.peek() {
                None | Some(',' | ')' | '\n' | '\r') => true,
                Some(c) => c.is_ascii_alphabetic() || c == '_' || c == '@' || c == ':',
            };
            if literal_ends {
                self.reader.rewind(end);
                return Ok(self.reader.slice(mark, end).to_string());
            }
            self.reader.rewind(mark);
        }
        let value = self.reader.read_expression(&[',', ')'])?.trim();
        if value.is_empty() {
            return Err(self.error(ErrorKind::InvalidSyntax, "attribute value is missing"));
        }
        Ok(value.to_string())
    }

    // === Helpers ===

    fn read_required_name(&mut self, what: &str) -> Result<String, Error> {
        let name = self.reader.read_while(is_name_char);
        if name.is_empty() {
            return Err(self.error(ErrorKind::InvalidSyntax, format!("expected a {what}")));
        }
        Ok(name.to_string())
    }

    /// Rest of the line as a bracket-checked expression
    fn read_subject(&mut self, keyword: &str) -> Result<String, Error> {
        self.reader.read_spaces();
        let position = self.reader.position();
        let subject = self.reader.read_expression(&['\n', '\r'])?.trim();
        if subject.is_empty() {
            return Err(Error::lex(
                ErrorKind::InvalidSyntax,
                format!("`{keyword}` needs an expression"),
                position,
            ));
        }
        Ok(subject.to_string())
    }

    fn read_path(&mut self) -> Result<String, Error> {
        self.reader.read_spaces();
        let position = self.reader.position();
        let raw = self.reader.read_until_new_line().trim();
        let path = match Reader::new(raw).read_string() {
            Ok(Some(unquoted)) => unquoted,
            _ => raw.to_string(),
        };
        if path.is_empty() {
            return Err(Error::lex(ErrorKind::InvalidSyntax, "expected a template path", position));
        }
        Ok(path)
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Some(Ok(token));
            }
            if self.finished {
                return None;
            }
            if let Err(err) = self.lex_line() {
                self.finished = true;
                self.pending.clear();
                return Some(Err(err));
            }
        }
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_attribute_name_char(c: char) -> bool {
    is_name_char(c) || matches!(c, ':' | '@' | '.' | '$')
}

fn is_plain_name(word: &str) -> bool {
    word.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && word.chars().all(|c| is_name_char(c) || c == ':')
}

/// `$name` or `name`, normalized to `$name`
fn variable_name(name: &str) -> Option<String> {
    let bare = name.strip_prefix('$').unwrap_or(name);
    let valid = bare.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && bare.chars().all(is_identifier_char);
    valid.then(|| format!("${bare}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn tag(name: &str) -> TokenKind {
        TokenKind::Tag { name: name.to_string() }
    }

    fn text(value: &str) -> TokenKind {
        TokenKind::Text { value: value.to_string() }
    }

    #[test]
    fn test_nesting_tokens() {
        let tokens = kinds("ul\n  li one\n  li two\np");
        assert_eq!(
            tokens,
            vec![
                tag("ul"),
                TokenKind::NewLine,
                TokenKind::Indent,
                tag("li"),
                text("one"),
                TokenKind::NewLine,
                tag("li"),
                text("two"),
                TokenKind::NewLine,
                TokenKind::Outdent,
                tag("p"),
                TokenKind::NewLine,
            ]
        );
    }

    #[test]
    fn test_outdent_per_level_and_at_end_of_input() {
        let tokens = kinds("a\n  b\n    c\nd\n  e");
        let outdents = tokens.iter().filter(|t| **t == TokenKind::Outdent).count();
        let indents = tokens.iter().filter(|t| **t == TokenKind::Indent).count();
        assert_eq!(indents, 3);
        assert_eq!(outdents, 3);
        assert_eq!(tokens.last(), Some(&TokenKind::Outdent));
    }

    #[test]
    fn test_indentation_round_trip() {
        let source = "html\n  head\n    title x\n\n  body\n    div\n      p\n        span\n    footer\nend";
        let mut depth: usize = 0;
        let mut depths = Vec::new();
        let mut line_open = false;
        for token in tokenize(source).unwrap() {
            match token.kind {
                TokenKind::Indent => depth += 1,
                TokenKind::Outdent => depth -= 1,
                TokenKind::NewLine => line_open = false,
                _ if !line_open => {
                    depths.push(depth);
                    line_open = true;
                }
                _ => {}
            }
        }

        let expected: Vec<usize> = source
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| (line.len() - line.trim_start().len()) / 2)
            .collect();
        assert_eq!(depths, expected);
        assert_eq!(depth, 0);
    }

    #[test]
    fn test_tabs_are_a_valid_style() {
        let tokens = kinds("div\n\tp\n\t\tspan");
        assert_eq!(tokens.iter().filter(|t| **t == TokenKind::Indent).count(), 2);
    }

    #[test]
    fn test_mixed_indentation() {
        let err = tokenize("div\n  p\n\tspan").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MixedIndentation));
        assert_eq!(err.position(), Some(Position::new(3, 0)));

        let err = tokenize("div\n \tp").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MixedIndentation));
    }

    #[test]
    fn test_inconsistent_dedent() {
        let err = tokenize("div\n    p\n  span").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InconsistentIndentation));
    }

    #[test]
    fn test_tag_shorthands_and_attributes() {
        let tokens = kinds("a.btn#go(href=\"/x\", target='_blank' data-id=$id) Go");
        assert_eq!(
            tokens,
            vec![
                tag("a"),
                TokenKind::Class { name: "btn".into() },
                TokenKind::Id { name: "go".into() },
                TokenKind::AttributeStart,
                TokenKind::Attribute {
                    name: Some("href".into()),
                    value: Some("\"/x\"".into()),
                    escaped: true,
                    checked: true
                },
                TokenKind::Attribute {
                    name: Some("target".into()),
                    value: Some("'_blank'".into()),
                    escaped: true,
                    checked: true
                },
                TokenKind::Attribute {
                    name: Some("data-id".into()),
                    value: Some("$id".into()),
                    escaped: true,
                    checked: true
                },
                TokenKind::AttributeEnd,
                text("Go"),
                TokenKind::NewLine,
            ]
        );
    }

    #[test]
    fn test_implicit_div() {
        let tokens = kinds(".card#main");
        assert_eq!(tokens[0], tag("div"));
        assert_eq!(tokens[1], TokenKind::Class { name: "card".into() });
        assert_eq!(tokens[2], TokenKind::Id { name: "main".into() });
    }

    #[test]
    fn test_leading_interpolation_is_text() {
        assert_eq!(kinds("#{$name} says hi")[0], text("#{$name} says hi"));
        assert_eq!(kinds("#[b bold] start")[0], text("#[b bold] start"));
        assert_eq!(kinds("!{$html}")[0], text("!{$html}"));
        assert_eq!(kinds("#main")[0], tag("div"));
    }

    #[test]
    fn test_attribute_flags_and_bare_values() {
        let tokens = kinds("input(value!=$raw, title?=$t, disabled checked, $a == $b)");
        let attrs: Vec<_> = tokens
            .into_iter()
            .filter(|t| matches!(t, TokenKind::Attribute { .. }))
            .collect();
        assert_eq!(attrs.len(), 5);
        assert!(matches!(&attrs[0], TokenKind::Attribute { name: Some(n), escaped: false, checked: true, .. } if n == "value"));
        assert!(matches!(&attrs[1], TokenKind::Attribute { name: Some(n), escaped: true, checked: false, .. } if n == "title"));
        assert!(matches!(&attrs[2], TokenKind::Attribute { name: None, value: Some(v), .. } if v == "disabled"));
        assert!(matches!(&attrs[3], TokenKind::Attribute { name: None, value: Some(v), .. } if v == "checked"));
        assert!(matches!(&attrs[4], TokenKind::Attribute { name: None, value: Some(v), .. } if v == "$a == $b"));
    }

    #[test]
    fn test_attribute_expression_value_with_commas() {
        let tokens = kinds("div(class=implode(' ', [$a, $b]), id=\"x\")");
        assert!(tokens.iter().any(|t| matches!(
            t,
            TokenKind::Attribute { name: Some(n), value: Some(v), .. }
                if n == "class" && v == "implode(' ', [$a, $b])"
        )));
    }

    #[test]
    fn test_multiline_attributes() {
        let tokens = kinds("a(\n  href=\"/\"\n  title=\"Home\"\n) Home\np");
        let attrs = tokens
            .iter()
            .filter(|t| matches!(t, TokenKind::Attribute { .. }))
            .count();
        assert_eq!(attrs, 2);
        assert!(!tokens.contains(&TokenKind::Indent));
        assert_eq!(tokens.last(), Some(&TokenKind::NewLine));
    }

    #[test]
    fn test_unclosed_attribute_list() {
        let err = tokenize("a(href=\"/\"").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::UnbalancedBrackets));
        assert_eq!(err.position(), Some(Position::new(1, 1)));
    }

    #[test]
    fn test_unterminated_quote() {
        let err = tokenize("a(href=\"/)").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::UnterminatedString));
    }

    #[test]
    fn test_text_block() {
        let tokens = kinds("script.\n  if (a) {\n    b();\n  }\np");
        assert_eq!(tokens[0], tag("script"));
        assert_eq!(tokens[1], text("if (a) {\n  b();\n}"));
        assert_eq!(tokens[2], TokenKind::NewLine);
        assert_eq!(tokens[3], tag("p"));
    }

    #[test]
    fn test_text_block_keeps_inner_blank_lines() {
        let tokens = kinds("pre.\n  a\n\n  b\n\np");
        assert_eq!(tokens[1], text("a\n\nb"));
        assert_eq!(tokens[3], tag("p"));
    }

    #[test]
    fn test_comments() {
        let tokens = kinds("// visible\n//- hidden\n//\n  block one\n  block two");
        assert_eq!(
            tokens,
            vec![
                TokenKind::Comment { content: "visible".into(), rendered: true },
                TokenKind::NewLine,
                TokenKind::Comment { content: "hidden".into(), rendered: false },
                TokenKind::NewLine,
                TokenKind::Comment { content: "block one\nblock two".into(), rendered: true },
                TokenKind::NewLine,
            ]
        );
    }

    #[test]
    fn test_keywords() {
        let tokens = kinds(
            "doctype html\nextends layout\ninclude:css style.css\nblock append scripts\nprepend head\nblock",
        );
        assert_eq!(tokens[0], TokenKind::Doctype { name: "html".into() });
        assert_eq!(
            tokens[2],
            TokenKind::Import { kind: ImportKind::Extends, path: "layout".into(), filter: None }
        );
        assert_eq!(
            tokens[4],
            TokenKind::Import {
                kind: ImportKind::Include,
                path: "style.css".into(),
                filter: Some("css".into())
            }
        );
        assert_eq!(
            tokens[6],
            TokenKind::Block { name: Some("scripts".into()), mode: BlockMode::Append }
        );
        assert_eq!(
            tokens[8],
            TokenKind::Block { name: Some("head".into()), mode: BlockMode::Prepend }
        );
        assert_eq!(tokens[10], TokenKind::Block { name: None, mode: BlockMode::Replace });
    }

    #[test]
    fn test_control_flow() {
        let tokens = kinds(
            "if $a\nelse if ($b)\nelse\nunless $c\neach $v, $k in $items\nwhile $i < 3\ndo\nfor $i = 0; $i < 3; $i++",
        );
        assert_eq!(
            tokens[0],
            TokenKind::Conditional { kind: ConditionKind::If, subject: Some("$a".into()) }
        );
        assert_eq!(
            tokens[2],
            TokenKind::Conditional { kind: ConditionKind::ElseIf, subject: Some("($b)".into()) }
        );
        assert_eq!(tokens[4], TokenKind::Conditional { kind: ConditionKind::Else, subject: None });
        assert_eq!(
            tokens[6],
            TokenKind::Conditional { kind: ConditionKind::Unless, subject: Some("$c".into()) }
        );
        assert_eq!(
            tokens[8],
            TokenKind::Each { item: "$v".into(), key: Some("$k".into()), subject: "$items".into() }
        );
        assert_eq!(tokens[10], TokenKind::While { subject: "$i < 3".into() });
        assert_eq!(tokens[12], TokenKind::Do);
        assert_eq!(tokens[14], TokenKind::For { subject: "$i = 0; $i < 3; $i++".into() });
    }

    #[test]
    fn test_case_when_with_expansion() {
        let tokens = kinds("case $x\n  when Foo::BAR: p bar\n  default: p none");
        assert_eq!(tokens[3], TokenKind::When { subject: Some("Foo::BAR".into()) });
        assert_eq!(tokens[4], TokenKind::Expansion);
        assert_eq!(tokens[5], tag("p"));
        assert_eq!(tokens[6], text("bar"));
        assert_eq!(tokens[8], TokenKind::When { subject: None });
        assert_eq!(tokens[9], TokenKind::Expansion);
    }

    #[test]
    fn test_malformed_each() {
        let err = tokenize("each $items").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::InvalidSyntax));
    }

    #[test]
    fn test_mixins() {
        let tokens = kinds("mixin card($title, $body='')\n  p= $title\n+card('Hi', body=$text)");
        assert_eq!(tokens[0], TokenKind::Mixin { name: "card".into() });
        assert_eq!(tokens[1], TokenKind::AttributeStart);
        assert!(matches!(&tokens[2], TokenKind::Attribute { name: None, value: Some(v), .. } if v == "$title"));
        assert!(matches!(&tokens[3], TokenKind::Attribute { name: Some(n), value: Some(v), .. } if n == "$body" && v == "''"));
        assert!(tokens.contains(&TokenKind::MixinCall { name: "card".into() }));
    }

    #[test]
    fn test_expressions_code_and_variables() {
        let tokens = kinds("= $a\n!= $b\n?= $c\n?!= $d\n- $x = 1\n$y = 2");
        assert_eq!(
            tokens[0],
            TokenKind::Expression { value: "$a".into(), escaped: true, checked: true }
        );
        assert_eq!(
            tokens[2],
            TokenKind::Expression { value: "$b".into(), escaped: false, checked: true }
        );
        assert_eq!(
            tokens[4],
            TokenKind::Expression { value: "$c".into(), escaped: true, checked: false }
        );
        assert_eq!(
            tokens[6],
            TokenKind::Expression { value: "$d".into(), escaped: false, checked: false }
        );
        assert_eq!(tokens[8], TokenKind::Code { value: "$x = 1".into(), block: false });
        assert_eq!(tokens[10], TokenKind::Variable { name: "$y".into(), value: "2".into() });
    }

    #[test]
    fn test_code_block() {
        let tokens = kinds("-\n  $a = 1;\n  $b = 2;\np");
        assert_eq!(tokens[0], TokenKind::Code { value: "$a = 1;\n$b = 2;".into(), block: true });
        assert_eq!(tokens[2], tag("p"));
    }

    #[test]
    fn test_tag_trailers() {
        let tokens = kinds("img(src=$src)/\nli: a(href=\"#\") Top\nsvg:path\np= $x");
        assert!(tokens.contains(&TokenKind::SelfClosing));
        assert!(tokens.contains(&TokenKind::Expansion));
        assert!(tokens.contains(&tag("svg:path")));
        assert!(tokens.contains(&TokenKind::Expression {
            value: "$x".into(),
            escaped: true,
            checked: true
        }));
    }

    #[test]
    fn test_filter_block() {
        let tokens = kinds(":css\n  a { color: red; }\np");
        assert_eq!(tokens[0], TokenKind::Filter { name: "css".into() });
        assert_eq!(tokens[1], text("a { color: red; }"));
    }

    #[test]
    fn test_unrecognized_line() {
        let err = tokenize("div\n@media").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::UnexpectedCharacter));
        assert_eq!(err.position(), Some(Position::new(2, 0)));
    }

    #[test]
    fn test_lexing_is_lazy() {
        // The error on line 3 is never reached when consumption stops early
        let mut lexer = Lexer::new("div\np\n)");
        assert!(matches!(lexer.next(), Some(Ok(Token { kind: TokenKind::Tag { .. }, .. }))));
        assert!(matches!(lexer.next(), Some(Ok(Token { kind: TokenKind::NewLine, .. }))));
    }

    #[test]
    fn test_token_positions() {
        let tokens = tokenize("div\n  p.note hi").unwrap();
        let class = tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::Class { .. }))
            .unwrap();
        assert_eq!(class.position, Position::new(2, 3));
    }
}
