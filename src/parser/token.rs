use serde::Serialize;

/// Position in source. `line` is 1-based, `offset` is the 0-based column in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Position {
    pub line: usize,
    pub offset: usize,
}

impl Position {
    pub fn new(line: usize, offset: usize) -> Self {
        Self { line, offset }
    }
}

/// How a block combines with the block of the same name in a base template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    #[default]
    Replace,
    Append,
    Prepend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportKind {
    Extends,
    Include,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionKind {
    If,
    ElseIf,
    Else,
    Unless,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum TokenKind {
    // Structure
    Indent,
    Outdent,
    NewLine,

    // Elements
    Tag { name: String },
    Class { name: String },
    Id { name: String },
    AttributeStart,
    Attribute {
        name: Option<String>,
        value: Option<String>,
        escaped: bool,
        checked: bool,
    },
    AttributeEnd,
    Assignment { name: String },
    SelfClosing,
    Expansion,

    // Content
    Text { value: String },
    Expression { value: String, escaped: bool, checked: bool },
    Code { value: String, block: bool },
    Comment { content: String, rendered: bool },
    Doctype { name: String },
    Filter { name: String },
    Variable { name: String, value: String },

    // Structure keywords
    Import { kind: ImportKind, path: String, filter: Option<String> },
    Block { name: Option<String>, mode: BlockMode },
    Mixin { name: String },
    MixinCall { name: String },

    // Control flow
    Conditional { kind: ConditionKind, subject: Option<String> },
    Case { subject: String },
    When { subject: Option<String> },
    Each { item: String, key: Option<String>, subject: String },
    While { subject: String },
    Do,
    For { subject: String },
}

/// A lexical unit with its source position
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub position: Position,
}

impl Token {
    pub fn new(kind: TokenKind, position: Position) -> Self {
        Self { kind, position }
    }

    pub fn name(&self) -> &'static str {
        match &self.kind {
            TokenKind::Indent => "indent",
            TokenKind::Outdent => "outdent",
            TokenKind::NewLine => "newline",
            TokenKind::Tag { .. } => "tag",
            TokenKind::Class { .. } => "class",
            TokenKind::Id { .. } => "id",
            TokenKind::AttributeStart => "attribute-start",
            TokenKind::Attribute { .. } => "attribute",
            TokenKind::AttributeEnd => "attribute-end",
            TokenKind::Assignment { .. } => "assignment",
            TokenKind::SelfClosing => "self-closing",
            TokenKind::Expansion => "expansion",
            TokenKind::Text { .. } => "text",
            TokenKind::Expression { .. } => "expression",
            TokenKind::Code { .. } => "code",
            TokenKind::Comment { .. } => "comment",
            TokenKind::Doctype { .. } => "doctype",
            TokenKind::Filter { .. } => "filter",
            TokenKind::Variable { .. } => "variable",
            TokenKind::Import { .. } => "import",
            TokenKind::Block { .. } => "block",
            TokenKind::Mixin { .. } => "mixin",
            TokenKind::MixinCall { .. } => "mixin-call",
            TokenKind::Conditional { .. } => "conditional",
            TokenKind::Case { .. } => "case",
            TokenKind::When { .. } => "when",
            TokenKind::Each { .. } => "each",
            TokenKind::While { .. } => "while",
            TokenKind::Do => "do",
            TokenKind::For { .. } => "for",
        }
    }
}
