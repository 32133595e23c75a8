use super::token::{Position, Token, TokenKind};
use crate::ast::{Document, NodeId, NodeKind};
use crate::error::{Error, ErrorKind};
use std::iter::Peekable;

/// Builds a `Document` from a token stream in a single forward pass
pub struct TreeBuilder<I: Iterator<Item = Result<Token, Error>>> {
    tokens: Peekable<I>,
    document: Document,
    /// Node new lines are appended to
    current: NodeId,
    /// First node created on the current line
    line_node: Option<NodeId>,
    /// Innermost node of the most recent line; an indent nests under it
    last: Option<NodeId>,
    /// Expansions (`li: a`) opened on the current line
    expansions: usize,
    /// Levels the matching outdent has to climb, one entry per open indent
    frames: Vec<usize>,
    /// Owner of the attribute list being read
    attribute_target: Option<NodeId>,
    /// Assignment waiting for its attribute list
    pending_assignment: Option<NodeId>,
}

impl<I: Iterator<Item = Result<Token, Error>>> TreeBuilder<I> {
    pub fn new(tokens: I) -> Self {
        let document = Document::new();
        let root = document.root();
        Self {
            tokens: tokens.peekable(),
            document,
            current: root,
            line_node: None,
            last: None,
            expansions: 0,
            frames: Vec::new(),
            attribute_target: None,
            pending_assignment: None,
        }
    }

    pub fn build(mut self) -> Result<Document, Error> {
        while let Some(token) = self.tokens.next() {
            self.handle(token?)?;
        }
        Ok(self.document)
    }

    fn handle(&mut self, token: Token) -> Result<(), Error> {
        let position = token.position;
        match token.kind {
            TokenKind::Indent => self.descend(1, position),
            TokenKind::Outdent => {
                let levels = self.frames.pop().ok_or_else(|| {
                    Error::parse(ErrorKind::StrayOutdent, "outdent without a matching indent", position)
                })?;
                self.ascend(levels, position)
            }
            TokenKind::NewLine => self.end_line(position),

            TokenKind::Class { name } => self.add_shorthand("class", name, position),
            TokenKind::Id { name } => self.add_shorthand("id", name, position),
            TokenKind::AttributeStart => {
                let target = self.pending_assignment.take().or(self.line_node);
                let target = target
                    .filter(|&id| self.document.kind(id).accepts_attributes())
                    .ok_or_else(|| misplaced("attribute list", position))?;
                self.attribute_target = Some(target);
                Ok(())
            }
            TokenKind::Attribute { name, value, escaped, checked } => {
                let target = self
                    .attribute_target
                    .ok_or_else(|| misplaced("attribute", position))?;
                let kind = NodeKind::Attribute { name, value, escaped, checked };
                self.document.append_attribute(target, kind, position);
                Ok(())
            }
            TokenKind::AttributeEnd => match self.attribute_target.take() {
                Some(_) => Ok(()),
                None => Err(Error::parse(
                    ErrorKind::UnexpectedToken,
                    "attribute list closed without being opened",
                    position,
                )),
            },
            TokenKind::Assignment { name } => {
                let owner = self
                    .line_node
                    .filter(|&id| {
                        matches!(
                            self.document.kind(id),
                            NodeKind::Element { .. } | NodeKind::MixinCall { .. }
                        )
                    })
                    .ok_or_else(|| misplaced("assignment", position))?;
                let id = self
                    .document
                    .append_attribute(owner, NodeKind::Assignment { name }, position);
                self.pending_assignment = Some(id);
                Ok(())
            }
            TokenKind::SelfClosing => match self.line_node.map(|id| &mut self.document.node_mut(id).kind) {
                Some(NodeKind::Element { self_closing, .. }) => {
                    *self_closing = true;
                    Ok(())
                }
                _ => Err(Error::parse(
                    ErrorKind::UnexpectedToken,
                    "only elements can be self-closing",
                    position,
                )),
            },
            TokenKind::Expansion => {
                let head = self.line_node.ok_or_else(|| {
                    Error::parse(ErrorKind::UnexpectedToken, "nothing to expand", position)
                })?;
                self.current = head;
                self.expansions += 1;
                self.line_node = None;
                Ok(())
            }

            TokenKind::Text { value } => {
                self.append_inline(NodeKind::Text { value, verbatim: false }, position);
                Ok(())
            }
            TokenKind::Expression { value, escaped, checked } => {
                self.append_inline(NodeKind::Expression { value, escaped, checked }, position);
                Ok(())
            }

            TokenKind::Tag { name } => {
                self.append_line_node(NodeKind::Element { tag: name, self_closing: false }, position);
                Ok(())
            }
            TokenKind::Code { value, block } => self.line(NodeKind::Code { value, block }, position),
            TokenKind::Comment { content, rendered } => {
                self.line(NodeKind::Comment { content, rendered }, position)
            }
            TokenKind::Doctype { name } => self.line(NodeKind::Doctype { name }, position),
            TokenKind::Filter { name } => self.line(NodeKind::Filter { name }, position),
            TokenKind::Variable { name, value } => {
                self.line(NodeKind::Variable { name, value }, position)
            }
            TokenKind::Import { kind, path, filter } => {
                self.line(NodeKind::Import { kind, path, filter }, position)
            }
            TokenKind::Block { name, mode } => self.line(NodeKind::Block { name, mode }, position),
            TokenKind::Mixin { name } => self.line(NodeKind::Mixin { name }, position),
            TokenKind::MixinCall { name } => self.line(NodeKind::MixinCall { name }, position),
            TokenKind::Conditional { kind, subject } => {
                self.line(NodeKind::Conditional { kind, subject }, position)
            }
            TokenKind::Case { subject } => self.line(NodeKind::Case { subject }, position),
            TokenKind::When { subject } => self.line(NodeKind::When { subject }, position),
            TokenKind::Each { item, key, subject } => {
                self.line(NodeKind::Each { item, key, subject }, position)
            }
            TokenKind::While { subject } => self.line(NodeKind::While { subject }, position),
            TokenKind::Do => self.line(NodeKind::Do, position),
            TokenKind::For { subject } => self.line(NodeKind::For { subject }, position),
        }
    }

    fn line(&mut self, kind: NodeKind, position: Position) -> Result<(), Error> {
        self.append_line_node(kind, position);
        Ok(())
    }

    // === Nesting ===

    fn end_line(&mut self, position: Position) -> Result<(), Error> {
        self.line_node = None;
        self.attribute_target = None;
        self.pending_assignment = None;
        let expansions = std::mem::take(&mut self.expansions);

        if let Some(Ok(Token { kind: TokenKind::Indent, position })) = self.tokens.peek() {
            let position = *position;
            self.tokens.next();
            return self.descend(1 + expansions, position);
        }
        self.ascend(expansions, position)
    }

    /// Nest the following lines under the innermost node of the previous line
    fn descend(&mut self, outdent_levels: usize, position: Position) -> Result<(), Error> {
        let target = self.last.ok_or_else(|| {
            Error::parse(ErrorKind::UnexpectedIndent, "indented line has no parent", position)
        })?;
        if !accepts_children(self.document.kind(target)) {
            return Err(Error::parse(
                ErrorKind::UnexpectedIndent,
                "this line cannot contain nested content",
                position,
            ));
        }
        self.current = target;
        self.frames.push(outdent_levels);
        Ok(())
    }

    fn ascend(&mut self, levels: usize, position: Position) -> Result<(), Error> {
        for _ in 0..levels {
            self.current = self.document.parent(self.current).ok_or_else(|| {
                Error::parse(ErrorKind::StrayOutdent, "outdent past the document root", position)
            })?;
        }
        Ok(())
    }

    // === Nodes ===

    /// Node that opens a line (or the part of a line after an expansion)
    fn append_line_node(&mut self, kind: NodeKind, position: Position) -> NodeId {
        let parent = self.line_node.unwrap_or(self.current);
        let id = self.document.append(parent, kind, position);
        if self.expansions > 0 && self.line_node.is_none() {
            self.document.node_mut(id).outer = Some(parent);
        }
        self.line_node = Some(id);
        self.last = Some(id);
        id
    }

    /// Text or expression: child of the line's node, or a line of its own
    fn append_inline(&mut self, kind: NodeKind, position: Position) {
        match self.line_node {
            Some(owner) => {
                self.document.append(owner, kind, position);
            }
            None => {
                self.append_line_node(kind, position);
            }
        }
    }

    /// `.name` / `#name` shorthand as a bareword attribute
    fn add_shorthand(&mut self, attribute: &str, name: String, position: Position) -> Result<(), Error> {
        let owner = self
            .line_node
            .filter(|&id| self.document.kind(id).accepts_attributes())
            .ok_or_else(|| misplaced(&format!("`{attribute}` shorthand"), position))?;
        let kind = NodeKind::Attribute {
            name: Some(attribute.to_string()),
            value: Some(name),
            escaped: true,
            checked: true,
        };
        self.document.append_attribute(owner, kind, position);
        Ok(())
    }
}

fn accepts_children(kind: &NodeKind) -> bool {
    !matches!(
        kind,
        NodeKind::Text { .. }
            | NodeKind::Expression { .. }
            | NodeKind::Doctype { .. }
            | NodeKind::Comment { .. }
            | NodeKind::Variable { .. }
            | NodeKind::Import { .. }
            | NodeKind::Attribute { .. }
            | NodeKind::Assignment { .. }
    )
}

fn misplaced(what: &str, position: Position) -> Error {
    Error::parse(
        ErrorKind::MisplacedAttribute,
        format!("{what} has no element to attach to"),
        position,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::lexer::Lexer;

    fn build(source: &str) -> Document {
        TreeBuilder::new(Lexer::new(source)).build().unwrap()
    }

    fn build_err(source: &str) -> Error {
        TreeBuilder::new(Lexer::new(source)).build().unwrap_err()
    }

    fn tag(doc: &Document, id: NodeId) -> &str {
        match doc.kind(id) {
            NodeKind::Element { tag, .. } => tag,
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn test_nesting_follows_indentation() {
        let doc = build("html\n  body\n    p one\n    p two\n  footer");
        let root = doc.root();
        let html = doc.children(root)[0];
        assert_eq!(tag(&doc, html), "html");
        let [body, footer] = doc.children(html) else { panic!("expected two children") };
        assert_eq!(tag(&doc, *body), "body");
        assert_eq!(tag(&doc, *footer), "footer");
        assert_eq!(doc.children(*body).len(), 2);

        for id in doc.descendants(root).skip(1) {
            let parent = doc.parent(id).unwrap();
            assert_eq!(doc.node(id).level, doc.node(parent).level + 1);
        }
    }

    #[test]
    fn test_inline_text_is_child_of_line_node() {
        let doc = build("p Hello\n  span world");
        let p = doc.children(doc.root())[0];
        let children = doc.children(p);
        assert_eq!(children.len(), 2);
        assert!(matches!(doc.kind(children[0]), NodeKind::Text { value, .. } if value == "Hello"));
        assert_eq!(tag(&doc, children[1]), "span");
    }

    #[test]
    fn test_attributes_attach_to_element() {
        let doc = build("a.btn(href=\"/\")&attributes($extra) Go");
        let a = doc.children(doc.root())[0];
        let attrs = doc.attributes(a);
        assert_eq!(attrs.len(), 3);
        assert!(matches!(doc.kind(attrs[0]), NodeKind::Attribute { name: Some(n), value: Some(v), .. } if n == "class" && v == "btn"));
        assert!(matches!(doc.kind(attrs[1]), NodeKind::Attribute { name: Some(n), .. } if n == "href"));
        assert!(matches!(doc.kind(attrs[2]), NodeKind::Assignment { name } if name == "attributes"));
        assert_eq!(doc.attributes(attrs[2]).len(), 1);
        assert_eq!(doc.node(attrs[0]).outer, Some(a));
        assert_eq!(doc.children(a).len(), 1);
    }

    #[test]
    fn test_expansion_nests_and_restores() {
        let doc = build("ul\n  li: a(href=\"#\") Top\n  li: a More\n    span deep\np");
        let root = doc.root();
        let ul = doc.children(root)[0];
        let items = doc.children(ul);
        assert_eq!(items.len(), 2);
        let anchor = doc.children(items[0])[0];
        assert_eq!(tag(&doc, anchor), "a");
        assert_eq!(doc.node(anchor).outer, Some(items[0]));

        // The indented line nests under the innermost expanded node
        let second_anchor = doc.children(items[1])[0];
        let nested = doc.children(second_anchor);
        assert_eq!(nested.len(), 2);
        assert_eq!(tag(&doc, nested[1]), "span");

        assert_eq!(tag(&doc, doc.children(root)[1]), "p");
    }

    #[test]
    fn test_index_lists() {
        let doc = build(
            "extends layout\nblock content\n  +card('a')\n  include partial\nmixin card($t)\n  p= $t\nblock append scripts",
        );
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(doc.imports.len(), 2);
        assert_eq!(doc.mixins.len(), 1);
        assert_eq!(doc.mixin_calls.len(), 1);
        assert!(matches!(doc.kind(doc.imports[0]), NodeKind::Import { path, .. } if path == "layout"));
        assert!(matches!(doc.kind(doc.blocks[1]), NodeKind::Block { name: Some(n), .. } if n == "scripts"));
        // Mixin parameters are attributes of the mixin node
        assert_eq!(doc.attributes(doc.mixins[0]).len(), 1);
    }

    #[test]
    fn test_filter_text_is_child() {
        let doc = build(":css\n  a { color: red }");
        let filter = doc.children(doc.root())[0];
        assert!(matches!(doc.kind(filter), NodeKind::Filter { name } if name == "css"));
        assert_eq!(doc.children(filter).len(), 1);
    }

    #[test]
    fn test_self_closing() {
        let doc = build("foo(bar='baz')/");
        let foo = doc.children(doc.root())[0];
        assert!(matches!(doc.kind(foo), NodeKind::Element { self_closing: true, .. }));
    }

    #[test]
    fn test_stray_outdent() {
        let tokens = vec![
            Ok(Token::new(TokenKind::Tag { name: "p".into() }, Position::new(1, 0))),
            Ok(Token::new(TokenKind::NewLine, Position::new(1, 1))),
            Ok(Token::new(TokenKind::Outdent, Position::new(2, 0))),
        ];
        let err = TreeBuilder::new(tokens.into_iter()).build().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::StrayOutdent));
        assert_eq!(err.position(), Some(Position::new(2, 0)));
    }

    #[test]
    fn test_attribute_without_owner() {
        let tokens = vec![
            Ok(Token::new(TokenKind::Text { value: "hi".into() }, Position::new(1, 0))),
            Ok(Token::new(TokenKind::AttributeStart, Position::new(1, 2))),
        ];
        let err = TreeBuilder::new(tokens.into_iter()).build().unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::MisplacedAttribute));
        assert_eq!(err.position(), Some(Position::new(1, 2)));
    }

    #[test]
    fn test_leading_indentation() {
        let err = build_err("  p");
        assert_eq!(err.kind(), Some(ErrorKind::UnexpectedIndent));
    }

    #[test]
    fn test_nesting_under_text() {
        let err = build_err("| text\n  p");
        assert_eq!(err.kind(), Some(ErrorKind::UnexpectedIndent));
        assert_eq!(err.position(), Some(Position::new(2, 0)));
    }

    #[test]
    fn test_lex_errors_pass_through() {
        let err = build_err("div\n  p\n\tspan");
        assert!(matches!(err, Error::Lex(_)));
    }
}
