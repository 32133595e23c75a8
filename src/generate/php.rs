use super::{Formatter, GenerateOptions, Generator, Output};
use crate::ast::{ConditionKind, Document, NodeId, NodeKind, Position};
use crate::error::{Error, ErrorKind};
use crate::expression::{self, Segment, Value};
use crate::filter::{FilterContext, FilterOptions, Filters};
use crate::html::{self, Mode};
use crate::parser::{self, Reader};

/// Emits markup with embedded PHP from a resolved document
pub struct PhpGenerator<'f> {
    filters: &'f Filters,
}

impl<'f> PhpGenerator<'f> {
    pub fn new(filters: &'f Filters) -> Self {
        Self { filters }
    }
}

impl Generator for PhpGenerator<'_> {
    fn generate(&self, document: &Document, options: &GenerateOptions) -> Result<String, Error> {
        let formatter = Formatter::new(options.formatter.clone());
        let mode = options.mode.unwrap_or_else(|| detect_mode(document));
        let mut emitter = Emitter {
            document,
            formatter: &formatter,
            filters: self.filters,
            mode,
            charset: &options.escape_charset,
            out: Output::new(&formatter),
        };
        emitter.children(document.children(document.root()), 0, false)?;
        Ok(emitter.out.finish())
    }
}

/// Mode selected by the first doctype, HTML without one
fn detect_mode(document: &Document) -> Mode {
    document
        .descendants(document.root())
        .find_map(|id| match document.kind(id) {
            NodeKind::Doctype { name } => Some(html::doctype(name).1),
            _ => None,
        })
        .unwrap_or_default()
}

/// Attribute value after merging
enum AttrValue {
    Boolean,
    /// Boolean attribute present only when the PHP condition holds
    Conditional(String),
    Parts(Vec<Piece>),
}

enum Piece {
    Literal(String),
    Code(String),
}

struct Attr {
    name: String,
    value: AttrValue,
}

struct Emitter<'a> {
    document: &'a Document,
    formatter: &'a Formatter,
    filters: &'a Filters,
    mode: Mode,
    charset: &'a str,
    out: Output,
}

impl<'a> Emitter<'a> {
    // === Sequences ===

    /// Emit sibling nodes. `inline` keeps everything on the current line.
    fn children(&mut self, ids: &[NodeId], depth: usize, inline: bool) -> Result<(), Error> {
        let doc = self.document;
        let mut index = 0;
        while index < ids.len() {
            let id = ids[index];
            match doc.kind(id) {
                NodeKind::Text { .. } => {
                    let end = ids[index..]
                        .iter()
                        .position(|&sibling| !doc.kind(sibling).is_text())
                        .map_or(ids.len(), |offset| index + offset);
                    self.text_run(&ids[index..end], depth, inline)?;
                    index = end;
                }
                NodeKind::Conditional { kind: ConditionKind::If | ConditionKind::Unless, .. } => {
                    let end = self.chain_end(ids, index + 1);
                    self.conditional(&ids[index..end], depth, inline)?;
                    index = end;
                }
                NodeKind::Code { .. } if !doc.children(id).is_empty() => {
                    let end = self.code_chain_end(ids, index + 1);
                    self.code_chain(&ids[index..end], depth, inline)?;
                    index = end;
                }
                NodeKind::Do => {
                    let partner = self.next_visible(ids, index + 1);
                    match partner.map(|i| (i, doc.kind(ids[i]))) {
                        Some((i, NodeKind::While { subject })) => {
                            self.statement("do {", depth, inline);
                            self.children(doc.children(id), depth + 1, inline)?;
                            self.statement(&format!("}} while ({});", unwrap_parens(subject)), depth, inline);
                            index = i + 1;
                        }
                        _ => {
                            return Err(orphan("`do` must be followed by `while`", doc.node(id).position()));
                        }
                    }
                }
                _ => {
                    self.node(id, depth, inline)?;
                    index += 1;
                }
            }
        }
        Ok(())
    }

    fn is_hidden(&self, id: NodeId) -> bool {
        matches!(self.document.kind(id), NodeKind::Comment { rendered: false, .. })
    }

    fn next_visible(&self, ids: &[NodeId], from: usize) -> Option<usize> {
        (from..ids.len()).find(|&i| !self.is_hidden(ids[i]))
    }

    /// End (exclusive) of the `else if` / `else` branches following an `if`
    fn chain_end(&self, ids: &[NodeId], mut from: usize) -> usize {
        while let Some(i) = self.next_visible(ids, from) {
            match self.document.kind(ids[i]) {
                NodeKind::Conditional { kind: ConditionKind::ElseIf, .. } => from = i + 1,
                NodeKind::Conditional { kind: ConditionKind::Else, .. } => return i + 1,
                _ => break,
            }
        }
        from
    }

    /// End (exclusive) of the `- else`, `- catch` and `- finally` lines continuing a code block
    fn code_chain_end(&self, ids: &[NodeId], mut from: usize) -> usize {
        while let Some(i) = self.next_visible(ids, from) {
            match self.document.kind(ids[i]) {
                NodeKind::Code { value, .. } if continues_block(value) => from = i + 1,
                _ => break,
            }
        }
        from
    }

    // === Nodes ===

    fn node(&mut self, id: NodeId, depth: usize, inline: bool) -> Result<(), Error> {
        let doc = self.document;
        let position = doc.node(id).position();
        match doc.kind(id) {
            NodeKind::Document | NodeKind::Block { .. } => {
                self.children(doc.children(id), depth, inline)?;
            }
            NodeKind::Element { tag, self_closing } => {
                self.element(id, tag, *self_closing, depth, inline)?;
            }
            NodeKind::Text { .. } => self.text_run(&[id], depth, inline)?,
            NodeKind::Expression { value, escaped, checked } => {
                let echo = self.echo(value, *escaped, *checked);
                self.line(depth, inline);
                self.out.push(&echo);
            }
            NodeKind::Code { value, .. } => {
                if doc.children(id).is_empty() {
                    self.statement(value, depth, inline);
                } else {
                    self.code_chain(&[id], depth, inline)?;
                }
            }
            NodeKind::Comment { content, rendered } => {
                if *rendered {
                    self.line(depth, inline);
                    self.out.push(&format!("<!-- {content} -->"));
                }
            }
            NodeKind::Doctype { name } => {
                let (declaration, _) = html::doctype(name);
                // `<?xml` would open a PHP tag
                let declaration = if declaration.starts_with("<?") {
                    format!("<?={}?>", self.formatter.code_string(&declaration))
                } else {
                    declaration
                };
                self.line(depth, inline);
                self.out.push(&declaration);
            }
            NodeKind::Mixin { .. } | NodeKind::Attribute { .. } | NodeKind::Assignment { .. } => {}
            NodeKind::MixinCall { name } => {
                return Err(Error::compile(
                    ErrorKind::UndefinedMixin,
                    format!("no mixin named `{name}`"),
                    position,
                ));
            }
            NodeKind::Import { path, .. } => {
                return Err(Error::compile(
                    ErrorKind::ImportNotFound,
                    format!("`{path}` was never resolved"),
                    position,
                ));
            }
            NodeKind::Each { item, key, subject } => {
                let head = match key {
                    Some(key) => format!("foreach ({subject} as {key} => {item}) {{"),
                    None => format!("foreach ({subject} as {item}) {{"),
                };
                self.block(&head, id, depth, inline)?;
            }
            NodeKind::Conditional { kind: ConditionKind::If | ConditionKind::Unless, .. } => {
                self.conditional(&[id], depth, inline)?;
            }
            NodeKind::Conditional { .. } => {
                return Err(orphan("`else` without a preceding `if`", position));
            }
            NodeKind::Case { subject } => self.case(id, subject, depth, inline)?,
            NodeKind::When { .. } => {
                return Err(orphan("`when` outside of `case`", position));
            }
            NodeKind::While { subject } => {
                self.block(&format!("while ({}) {{", unwrap_parens(subject)), id, depth, inline)?;
            }
            NodeKind::Do => {
                return Err(orphan("`do` must be followed by `while`", position));
            }
            NodeKind::For { subject } => {
                self.block(&format!("for ({}) {{", unwrap_parens(subject)), id, depth, inline)?;
            }
            NodeKind::Variable { name, value } => {
                self.statement(&format!("{name} = {value};"), depth, inline);
            }
            NodeKind::Filter { name } => self.filter(id, name, depth, inline)?,
        }
        Ok(())
    }

    fn line(&mut self, depth: usize, inline: bool) {
        if !inline {
            self.out.line(depth);
        }
    }

    /// `<?php code?>` on its own line
    fn statement(&mut self, code: &str, depth: usize, inline: bool) {
        self.line(depth, inline);
        self.out.push("<?php ");
        self.out.push(code);
        self.out.push("?>");
    }

    fn block(&mut self, head: &str, id: NodeId, depth: usize, inline: bool) -> Result<(), Error> {
        let doc = self.document;
        self.statement(head, depth, inline);
        self.children(doc.children(id), depth + 1, inline)?;
        self.statement("}", depth, inline);
        Ok(())
    }

    fn conditional(&mut self, chain: &[NodeId], depth: usize, inline: bool) -> Result<(), Error> {
        let doc = self.document;
        for &id in chain {
            let NodeKind::Conditional { kind, subject } = doc.kind(id) else {
                continue;
            };
            let subject = unwrap_parens(subject.as_deref().unwrap_or_default());
            let head = match kind {
                ConditionKind::If => format!("if ({subject}) {{"),
                ConditionKind::Unless => format!("if (!({subject})) {{"),
                ConditionKind::ElseIf => format!("}} elseif ({subject}) {{"),
                ConditionKind::Else => "} else {".to_string(),
            };
            self.statement(&head, depth, inline);
            self.children(doc.children(id), depth + 1, inline)?;
        }
        self.statement("}", depth, inline);
        Ok(())
    }

    /// Code lines with bodies; each continuation shares a tag with the previous closing brace
    fn code_chain(&mut self, chain: &[NodeId], depth: usize, inline: bool) -> Result<(), Error> {
        let doc = self.document;
        let mut open = false;
        for &id in chain {
            let NodeKind::Code { value, .. } = doc.kind(id) else {
                continue;
            };
            let value = value.trim();
            let head = if value.ends_with('{') {
                value.to_string()
            } else {
                format!("{value} {{")
            };
            let head = if open && !head.starts_with('}') { format!("}} {head}") } else { head };
            self.statement(&head, depth, inline);
            self.children(doc.children(id), depth + 1, inline)?;
            open = true;
        }
        self.statement("}", depth, inline);
        Ok(())
    }

    /// `switch`; nothing may be output between the switch and its first case
    fn case(&mut self, id: NodeId, subject: &str, depth: usize, inline: bool) -> Result<(), Error> {
        let doc = self.document;
        self.line(depth, inline);
        self.out.push(&format!("<?php switch ({}) {{", unwrap_parens(subject)));

        let mut open = true;
        let mut needs_break = false;
        for &when in doc.children(id) {
            let label = match doc.kind(when) {
                NodeKind::When { subject: Some(value) } => format!(" case {value}:"),
                NodeKind::When { subject: None } => " default:".to_string(),
                NodeKind::Comment { rendered: false, .. } => continue,
                _ => {
                    return Err(Error::compile(
                        ErrorKind::UnexpectedToken,
                        "only `when` and `default` may appear inside `case`",
                        doc.node(when).position(),
                    ));
                }
            };
            if !open {
                self.line(depth, inline);
                self.out.push("<?php");
            }
            if needs_break {
                self.out.push(" break;");
            }
            self.out.push(&label);

            // An empty `when` falls through to the next one
            let body = doc.children(when);
            if body.is_empty() {
                open = true;
                needs_break = false;
                continue;
            }
            self.out.push(" ?>");
            open = false;
            needs_break = true;
            self.children(body, depth + 1, inline)?;
        }

        if !open {
            self.line(depth, inline);
            self.out.push("<?php");
        }
        self.out.push(" }?>");
        Ok(())
    }

    fn filter(&mut self, id: NodeId, name: &str, depth: usize, inline: bool) -> Result<(), Error> {
        let doc = self.document;
        let filters = self.filters;
        let filter = filters.get(name).ok_or_else(|| {
            Error::compile(
                ErrorKind::UnknownFilter,
                format!("no filter named `{name}`"),
                doc.node(id).position(),
            )
            .with_help(format!("available filters: {}", filters.names().join(", ")))
        })?;

        let text = doc
            .children(id)
            .iter()
            .filter_map(|&child| match doc.kind(child) {
                NodeKind::Text { value, .. } => Some(value.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut options = FilterOptions::new();
        for &attr in doc.attributes(id) {
            match doc.kind(attr) {
                NodeKind::Attribute { name: Some(name), value, .. } => {
                    let value = match value.as_deref().map(expression::classify) {
                        Some(Value::Literal(text)) => text,
                        _ => value.clone().unwrap_or_else(|| "true".to_string()),
                    };
                    options.insert(name.clone(), value);
                }
                NodeKind::Attribute { name: None, value: Some(flag), .. } => {
                    options.insert(flag.clone(), "true".to_string());
                }
                _ => {}
            }
        }

        let context = FilterContext {
            mode: self.mode,
            pretty: self.out.is_pretty(),
            path: None,
        };
        let result = filter.apply(&text, &context, &options);
        self.line(depth, inline);
        self.out.push(&result);
        Ok(())
    }

    // === Elements ===

    fn element(
        &mut self,
        id: NodeId,
        tag: &str,
        self_closing: bool,
        depth: usize,
        inline: bool,
    ) -> Result<(), Error> {
        let doc = self.document;
        let children = doc.children(id);
        let has_content = children.iter().any(|&child| !self.is_hidden(child));
        let attributes = self.attributes(id);

        self.line(depth, inline);
        self.out.push("<");
        self.out.push(tag);
        self.out.push(&attributes);

        let void = html::is_void_element(tag) && self.mode != Mode::Xml;
        if self_closing || void {
            if has_content {
                return Err(Error::compile(
                    ErrorKind::VoidElementWithContent,
                    format!("`{tag}` is self-closing and cannot have content"),
                    doc.node(id).position(),
                ));
            }
            self.out.push(if self_closing || self.mode != Mode::Html { "/>" } else { ">" });
            return Ok(());
        }
        if self.mode == Mode::Xml && !has_content {
            self.out.push("/>");
            return Ok(());
        }

        self.out.push(">");
        let inline_content = inline
            || html::is_whitespace_sensitive(tag)
            || children.iter().all(|&child| {
                matches!(doc.kind(child), NodeKind::Text { .. } | NodeKind::Expression { .. })
                    || self.is_hidden(child)
            });
        self.children(children, depth + 1, inline_content)?;
        self.line(depth, inline_content);
        self.out.push("</");
        self.out.push(tag);
        self.out.push(">");
        Ok(())
    }

    /// Rendered attribute list, including the leading space
    fn attributes(&self, id: NodeId) -> String {
        let doc = self.document;
        let mut merged: Vec<Attr> = Vec::new();
        let mut spreads: Vec<&str> = Vec::new();

        for &attr in doc.attributes(id) {
            match doc.kind(attr) {
                NodeKind::Attribute { name: Some(name), value, escaped, checked } => {
                    let value = value.as_deref().unwrap_or("true");
                    self.merge(&mut merged, name, value, *escaped, *checked);
                }
                NodeKind::Attribute { name: None, value: Some(value), .. } => {
                    match expression::classify(value) {
                        Value::Literal(name) => self.merge(&mut merged, &name, "true", true, true),
                        _ => spreads.push(value.trim()),
                    }
                }
                NodeKind::Assignment { .. } => {
                    for &arg in doc.attributes(attr) {
                        if let NodeKind::Attribute { value: Some(value), .. } = doc.kind(arg) {
                            spreads.push(value.trim());
                        }
                    }
                }
                _ => {}
            }
        }

        let mut out = String::new();
        for attr in merged {
            match attr.value {
                AttrValue::Boolean => out.push_str(&self.boolean(&attr.name)),
                AttrValue::Conditional(condition) => {
                    out.push_str(&format!("<?php if ({condition}) {{?>"));
                    out.push_str(&self.boolean(&attr.name));
                    out.push_str("<?php }?>");
                }
                AttrValue::Parts(parts) => {
                    let body: String = parts
                        .iter()
                        .map(|piece| match piece {
                            Piece::Literal(text) => text.clone(),
                            Piece::Code(code) => format!("<?={code}?>"),
                        })
                        .collect();
                    out.push(' ');
                    out.push_str(&attr.name);
                    out.push('=');
                    out.push_str(&self.formatter.quote(&body));
                }
            }
        }
        for spread in spreads {
            out.push_str(&self.spread(spread));
        }
        out
    }

    fn merge(&self, merged: &mut Vec<Attr>, name: &str, value: &str, escaped: bool, checked: bool) {
        let joined = match name {
            "class" => Some(" "),
            "style" => Some("; "),
            _ => None,
        };

        let incoming = match expression::classify(value) {
            Value::Bool(false) | Value::Null => {
                if joined.is_none() {
                    merged.retain(|attr| attr.name != name);
                }
                return;
            }
            Value::Bool(true) => AttrValue::Boolean,
            Value::Literal(text) => {
                let text = if escaped { html::escape(&text) } else { text };
                AttrValue::Parts(vec![Piece::Literal(text)])
            }
            Value::Number(number) => AttrValue::Parts(vec![Piece::Literal(number.to_string())]),
            Value::Variable(code) | Value::Expression(code) => {
                if html::is_boolean_attribute(name) {
                    let condition = if checked && expression::is_variable(code) {
                        format!("!empty({code})")
                    } else {
                        code.to_string()
                    };
                    AttrValue::Conditional(condition)
                } else {
                    let mut code = if checked {
                        expression::guard(code, self.formatter.code_quote())
                    } else {
                        code.to_string()
                    };
                    if name == "class" {
                        code = format!("implode({}, (array) ({code}))", self.formatter.code_string(" "));
                    }
                    if escaped {
                        code = self.escape_code(&code);
                    }
                    AttrValue::Parts(vec![Piece::Code(code)])
                }
            }
        };

        match merged.iter_mut().find(|attr| attr.name == name) {
            Some(existing) => match (&mut existing.value, joined, incoming) {
                (AttrValue::Parts(parts), Some(separator), AttrValue::Parts(more)) => {
                    parts.push(Piece::Literal(separator.to_string()));
                    parts.extend(more);
                }
                (value, _, incoming) => *value = incoming,
            },
            None => merged.push(Attr {
                name: name.to_string(),
                value: incoming,
            }),
        }
    }

    fn boolean(&self, name: &str) -> String {
        match self.mode {
            Mode::Html => format!(" {name}"),
            Mode::Xhtml | Mode::Xml => format!(" {name}={}", self.formatter.quote(name)),
        }
    }

    /// Attributes from a runtime array, `&attributes($attrs)`
    fn spread(&self, expression: &str) -> String {
        let quote = self.formatter.options().quote_style.to_string();
        format!(
            "<?php foreach ((array) ({expression}) as $__name => $__value) {{ echo {} . $__name . {} . {} . {}; }}?>",
            self.formatter.code_string(" "),
            self.formatter.code_string(&format!("={quote}")),
            self.escape_code("$__value"),
            self.formatter.code_string(&quote),
        )
    }

    // === Text and expressions ===

    fn escape_code(&self, code: &str) -> String {
        format!(
            "htmlspecialchars({code}, ENT_QUOTES, {})",
            self.formatter.code_string(self.charset)
        )
    }

    fn echo(&self, value: &str, escaped: bool, checked: bool) -> String {
        let mut code = if checked {
            expression::guard(value, self.formatter.code_quote())
        } else {
            value.trim().to_string()
        };
        if escaped {
            code = self.escape_code(&code);
        }
        format!("<?={code}?>")
    }

    /// Adjacent text nodes: one line each in pretty block context, joined by newlines otherwise
    fn text_run(&mut self, ids: &[NodeId], depth: usize, inline: bool) -> Result<(), Error> {
        let doc = self.document;
        let block = self.out.is_pretty() && !inline;
        for (index, &id) in ids.iter().enumerate() {
            let NodeKind::Text { value, verbatim } = doc.kind(id) else {
                continue;
            };
            let position = doc.node(id).position();
            if block {
                if *verbatim {
                    self.out.line(depth);
                    self.out.push(value);
                    continue;
                }
                for (offset, line) in value.lines().enumerate() {
                    self.out.line(depth);
                    self.text(line, Position::new(position.line + offset, position.offset))?;
                }
            } else {
                if index > 0 {
                    self.out.push("\n");
                }
                if *verbatim {
                    self.out.push(value);
                } else {
                    self.text(value, position)?;
                }
            }
        }
        Ok(())
    }

    fn text(&mut self, value: &str, position: Position) -> Result<(), Error> {
        for segment in expression::interpolate(value, position)? {
            match segment {
                Segment::Text(text) => self.out.push(&text),
                Segment::Expression { value, escaped } => {
                    let echo = self.echo(&value, escaped, true);
                    self.out.push(&echo);
                }
                Segment::Tag(snippet) => self.inline_template(&snippet, position)?,
            }
        }
        Ok(())
    }

    /// `#[a(href="/") text]` inside text
    fn inline_template(&mut self, snippet: &str, position: Position) -> Result<(), Error> {
        let fragment = parser::parse(snippet).map_err(|err| {
            let reason = err.diagnostic().map(|d| d.message.clone()).unwrap_or_default();
            Error::compile(
                ErrorKind::InvalidInterpolation,
                format!("inline tag `#[{snippet}]` is invalid: {reason}"),
                position,
            )
        })?;
        let mut nested = Emitter {
            document: &fragment,
            formatter: self.formatter,
            filters: self.filters,
            mode: self.mode,
            charset: self.charset,
            out: Output::new(self.formatter),
        };
        nested.children(fragment.children(fragment.root()), 0, true)?;
        let rendered = nested.out.finish();
        self.out.push(&rendered);
        Ok(())
    }
}

fn orphan(message: &str, position: Position) -> Error {
    Error::compile(ErrorKind::OrphanBranch, message, position)
}

/// `else`, `elseif`, `catch` and `finally` reopen the block closed before them
fn continues_block(code: &str) -> bool {
    let code = code.trim_start().trim_start_matches('}').trim_start();
    let keyword = code.split(|c: char| !c.is_ascii_alphanumeric() && c != '_').next().unwrap_or_default();
    matches!(keyword, "else" | "elseif" | "catch" | "finally")
}

/// `($a)` becomes `$a` when the parentheses wrap the whole condition
fn unwrap_parens(subject: &str) -> &str {
    let subject = subject.trim();
    let Some(inner) = subject.strip_prefix('(').and_then(|s| s.strip_suffix(')')) else {
        return subject;
    };
    let mut reader = Reader::new(inner);
    match reader.read_expression(&[]) {
        Ok(_) => inner.trim(),
        Err(_) => subject,
    }
}
