use std::fmt::Write as _;

pub use crate::parser::token::{BlockMode, ConditionKind, ImportKind, Position};

/// Stable index of a node inside its `Document` arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Node variants
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Document,
    Element {
        tag: String,
        self_closing: bool,
    },
    /// Element attribute, mixin parameter or mixin call argument
    Attribute {
        name: Option<String>,
        value: Option<String>,
        escaped: bool,
        checked: bool,
    },
    /// `verbatim` text is emitted as-is (filter output); other text is interpolated
    Text {
        value: String,
        verbatim: bool,
    },
    Expression {
        value: String,
        escaped: bool,
        checked: bool,
    },
    Code {
        value: String,
        block: bool,
    },
    Comment {
        content: String,
        rendered: bool,
    },
    Doctype {
        name: String,
    },
    /// Named region; an unnamed block is a mixin's content slot
    Block {
        name: Option<String>,
        mode: BlockMode,
    },
    Mixin {
        name: String,
    },
    MixinCall {
        name: String,
    },
    Import {
        kind: ImportKind,
        path: String,
        filter: Option<String>,
    },
    Each {
        item: String,
        key: Option<String>,
        subject: String,
    },
    Conditional {
        kind: ConditionKind,
        subject: Option<String>,
    },
    Case {
        subject: String,
    },
    /// `subject` is `None` for `default`
    When {
        subject: Option<String>,
    },
    While {
        subject: String,
    },
    Do,
    For {
        subject: String,
    },
    /// `&name(...)` attached to an element
    Assignment {
        name: String,
    },
    Variable {
        name: String,
        value: String,
    },
    Filter {
        name: String,
    },
}

impl NodeKind {
    /// Whether attribute tokens may attach to this node
    pub fn accepts_attributes(&self) -> bool {
        matches!(
            self,
            NodeKind::Element { .. }
                | NodeKind::Mixin { .. }
                | NodeKind::MixinCall { .. }
                | NodeKind::Import { .. }
                | NodeKind::Filter { .. }
                | NodeKind::Assignment { .. }
        )
    }

    pub fn is_text(&self) -> bool {
        matches!(self, NodeKind::Text { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    /// Node this one conceptually belongs to (an attribute's element, an expansion's head).
    /// Lookup only, never ownership.
    pub outer: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Attribute and assignment nodes owned by this node
    pub attributes: Vec<NodeId>,
    pub line: usize,
    pub offset: usize,
    pub level: usize,
}

impl Node {
    pub fn position(&self) -> Position {
        Position::new(self.line, self.offset)
    }
}

/// A detached copy of a subtree, addressed by local indices
#[derive(Debug, Clone)]
pub struct Subtree {
    nodes: Vec<Node>,
}

/// Parsed template: a node arena rooted at a `Document` node.
///
/// Block, import, mixin and mixin-call nodes are also recorded in index lists
/// as they are created, in creation order. Nodes removed from the tree stay in
/// the arena (and in the index lists) but are no longer attached to the root.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    pub blocks: Vec<NodeId>,
    pub imports: Vec<NodeId>,
    pub mixins: Vec<NodeId>,
    pub mixin_calls: Vec<NodeId>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let root = Node {
            kind: NodeKind::Document,
            parent: None,
            outer: None,
            children: Vec::new(),
            attributes: Vec::new(),
            line: 1,
            offset: 0,
            level: 0,
        };
        Self {
            nodes: vec![root],
            blocks: Vec::new(),
            imports: Vec::new(),
            mixins: Vec::new(),
            mixin_calls: Vec::new(),
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id.0].kind
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    pub fn attributes(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].attributes
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.0].parent
    }

    // === Construction ===

    /// Create a node that is not yet part of the tree
    pub fn create(&mut self, kind: NodeKind, position: Position) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: None,
            outer: None,
            children: Vec::new(),
            attributes: Vec::new(),
            line: position.line,
            offset: position.offset,
            level: 0,
        });
        self.register(id);
        id
    }

    /// Create a node as the last child of `parent`
    pub fn append(&mut self, parent: NodeId, kind: NodeKind, position: Position) -> NodeId {
        let id = self.create(kind, position);
        self.attach(parent, id);
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Create an attribute-like node owned by `owner`
    pub fn append_attribute(&mut self, owner: NodeId, kind: NodeKind, position: Position) -> NodeId {
        let id = self.create(kind, position);
        self.attach(owner, id);
        self.nodes[id.0].outer = Some(owner);
        self.nodes[owner.0].attributes.push(id);
        id
    }

    fn register(&mut self, id: NodeId) {
        match self.nodes[id.0].kind {
            NodeKind::Block { .. } => self.blocks.push(id),
            NodeKind::Import { .. } => self.imports.push(id),
            NodeKind::Mixin { .. } => self.mixins.push(id),
            NodeKind::MixinCall { .. } => self.mixin_calls.push(id),
            _ => {}
        }
    }

    /// Set `child`'s parent and recompute levels below it
    fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[child.0].parent = Some(parent);
        let level = self.nodes[parent.0].level + 1;
        self.relevel(child, level);
    }

    fn relevel(&mut self, id: NodeId, level: usize) {
        let mut stack = vec![(id, level)];
        while let Some((id, level)) = stack.pop() {
            let node = &mut self.nodes[id.0];
            node.level = level;
            stack.extend(node.children.iter().map(|&c| (c, level + 1)));
            stack.extend(node.attributes.iter().map(|&a| (a, level + 1)));
        }
    }

    // === Mutation ===

    /// Replace `id` in its parent's children with `replacements`, detaching `id`
    pub fn replace(&mut self, id: NodeId, replacements: Vec<NodeId>) {
        let Some(parent) = self.nodes[id.0].parent else {
            return;
        };
        for &new in &replacements {
            self.attach(parent, new);
        }
        let siblings = &mut self.nodes[parent.0].children;
        if let Some(index) = siblings.iter().position(|&c| c == id) {
            siblings.splice(index..=index, replacements);
        }
        self.nodes[id.0].parent = None;
    }

    /// Replace all children of `id`, detaching the previous ones
    pub fn set_children(&mut self, id: NodeId, children: Vec<NodeId>) {
        let old = std::mem::take(&mut self.nodes[id.0].children);
        for child in old {
            if !children.contains(&child) {
                self.nodes[child.0].parent = None;
            }
        }
        for &child in &children {
            self.attach(id, child);
        }
        self.nodes[id.0].children = children;
    }

    /// Insert detached nodes into `parent`'s children at `index`
    pub fn insert_children(&mut self, parent: NodeId, index: usize, nodes: Vec<NodeId>) {
        for &node in &nodes {
            self.attach(parent, node);
        }
        let children = &mut self.nodes[parent.0].children;
        let index = index.min(children.len());
        children.splice(index..index, nodes);
    }

    /// Remove `id` from the tree
    pub fn detach(&mut self, id: NodeId) {
        self.replace(id, Vec::new());
    }

    /// Whether `id` is still reachable from the root
    pub fn is_attached(&self, id: NodeId) -> bool {
        let mut current = id;
        loop {
            if current == self.root() {
                return true;
            }
            match self.nodes[current.0].parent {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    // === Copying ===

    /// Snapshot the subtree rooted at `id`, including attributes
    pub fn subtree(&self, id: NodeId) -> Subtree {
        let mut order = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            order.push(current);
            let node = &self.nodes[current.0];
            stack.extend(node.children.iter().rev());
            stack.extend(node.attributes.iter().rev());
        }

        let local = |old: NodeId| order.iter().position(|&o| o == old).map(NodeId);
        let nodes = order
            .iter()
            .map(|&old| {
                let mut node = self.nodes[old.0].clone();
                node.parent = node.parent.and_then(local);
                node.outer = node.outer.and_then(local);
                node.children = node.children.iter().filter_map(|&c| local(c)).collect();
                node.attributes = node.attributes.iter().filter_map(|&a| local(a)).collect();
                node
            })
            .collect();
        Subtree { nodes }
    }

    /// Copy a subtree (from this or another document) into the arena; returns its detached root
    pub fn graft(&mut self, subtree: Subtree) -> NodeId {
        let base = self.nodes.len();
        let shift = |id: NodeId| NodeId(id.0 + base);
        for mut node in subtree.nodes {
            node.parent = node.parent.map(shift);
            node.outer = node.outer.map(shift);
            node.children = node.children.into_iter().map(shift).collect();
            node.attributes = node.attributes.into_iter().map(shift).collect();
            let id = NodeId(self.nodes.len());
            self.nodes.push(node);
            self.register(id);
        }
        let root = NodeId(base);
        self.relevel(root, 0);
        root
    }

    /// Deep copy of `id` within this document, detached
    pub fn duplicate(&mut self, id: NodeId) -> NodeId {
        let subtree = self.subtree(id);
        self.graft(subtree)
    }

    /// Copy the children of another document's node into this arena, detached
    pub fn graft_children(&mut self, source: &Document, parent: NodeId) -> Vec<NodeId> {
        source
            .children(parent)
            .iter()
            .map(|&child| self.graft(source.subtree(child)))
            .collect()
    }

    // === Traversal ===

    /// Pre-order walk over `id` and its descendants (children only, not attributes)
    pub fn descendants(&self, id: NodeId) -> Descendants<'_> {
        Descendants {
            document: self,
            stack: vec![id],
        }
    }

    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&current| self.parent(current))
    }

    /// Indented text rendering of the tree, for debugging
    pub fn dump(&self) -> String {
        let mut out = String::new();
        for id in self.descendants(self.root()) {
            let node = self.node(id);
            let _ = writeln!(
                out,
                "{}{} ({}:{})",
                "  ".repeat(node.level),
                describe(&node.kind),
                node.line,
                node.offset
            );
            for &attr in &node.attributes {
                let attr_node = self.node(attr);
                let _ = writeln!(
                    out,
                    "{}@{}",
                    "  ".repeat(attr_node.level),
                    describe(&attr_node.kind)
                );
                for &inner in &attr_node.attributes {
                    let _ = writeln!(
                        out,
                        "{}@{}",
                        "  ".repeat(self.node(inner).level),
                        describe(self.kind(inner))
                    );
                }
            }
        }
        out
    }
}

/// Lazy pre-order traversal; start a new one to traverse again
pub struct Descendants<'a> {
    document: &'a Document,
    stack: Vec<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.stack.extend(self.document.children(id).iter().rev());
        Some(id)
    }
}

fn describe(kind: &NodeKind) -> String {
    match kind {
        NodeKind::Document => "document".to_string(),
        NodeKind::Element { tag, self_closing } => {
            format!("element {tag}{}", if *self_closing { "/" } else { "" })
        }
        NodeKind::Attribute { name, value, escaped, checked } => format!(
            "attribute {}={}{}{}",
            name.as_deref().unwrap_or("_"),
            value.as_deref().unwrap_or("_"),
            if *escaped { "" } else { " unescaped" },
            if *checked { "" } else { " unchecked" },
        ),
        NodeKind::Text { value, .. } => format!("text {value:?}"),
        NodeKind::Expression { value, .. } => format!("expression {value}"),
        NodeKind::Code { value, .. } => format!("code {value:?}"),
        NodeKind::Comment { content, rendered } => {
            format!("comment{} {content:?}", if *rendered { "" } else { " hidden" })
        }
        NodeKind::Doctype { name } => format!("doctype {name}"),
        NodeKind::Block { name, mode } => {
            format!("block {:?} {}", mode, name.as_deref().unwrap_or("<slot>"))
        }
        NodeKind::Mixin { name } => format!("mixin {name}"),
        NodeKind::MixinCall { name } => format!("call {name}"),
        NodeKind::Import { kind, path, filter } => match filter {
            Some(filter) => format!("{kind:?} {path} :{filter}"),
            None => format!("{kind:?} {path}"),
        },
        NodeKind::Each { item, key, subject } => match key {
            Some(key) => format!("each {item}, {key} in {subject}"),
            None => format!("each {item} in {subject}"),
        },
        NodeKind::Conditional { kind, subject } => {
            format!("{kind:?} {}", subject.as_deref().unwrap_or(""))
        }
        NodeKind::Case { subject } => format!("case {subject}"),
        NodeKind::When { subject } => match subject {
            Some(subject) => format!("when {subject}"),
            None => "default".to_string(),
        },
        NodeKind::While { subject } => format!("while {subject}"),
        NodeKind::Do => "do".to_string(),
        NodeKind::For { subject } => format!("for {subject}"),
        NodeKind::Assignment { name } => format!("&{name}"),
        NodeKind::Variable { name, value } => format!("variable {name} = {value}"),
        NodeKind::Filter { name } => format!("filter {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> NodeKind {
        NodeKind::Text { value: value.to_string(), verbatim: false }
    }

    fn element(tag: &str) -> NodeKind {
        NodeKind::Element { tag: tag.to_string(), self_closing: false }
    }

    #[test]
    fn test_append_sets_parent_and_level() {
        let mut doc = Document::new();
        let div = doc.append(doc.root(), element("div"), Position::new(1, 0));
        let p = doc.append(div, element("p"), Position::new(2, 2));
        assert_eq!(doc.parent(p), Some(div));
        assert_eq!(doc.node(div).level, 1);
        assert_eq!(doc.node(p).level, 2);
        assert_eq!(doc.node(p).position(), Position::new(2, 2));
    }

    #[test]
    fn test_index_lists_follow_creation_order() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = doc.append(root, NodeKind::Block { name: Some("a".into()), mode: BlockMode::Replace }, Position::default());
        let call = doc.append(a, NodeKind::MixinCall { name: "m".into() }, Position::default());
        let b = doc.append(root, NodeKind::Block { name: Some("b".into()), mode: BlockMode::Append }, Position::default());
        assert_eq!(doc.blocks, vec![a, b]);
        assert_eq!(doc.mixin_calls, vec![call]);
    }

    #[test]
    fn test_attributes_are_not_children() {
        let mut doc = Document::new();
        let a = doc.append(doc.root(), element("a"), Position::default());
        let href = doc.append_attribute(
            a,
            NodeKind::Attribute { name: Some("href".into()), value: Some("'/'".into()), escaped: true, checked: true },
            Position::default(),
        );
        assert!(doc.children(a).is_empty());
        assert_eq!(doc.attributes(a), &[href]);
        assert_eq!(doc.node(href).outer, Some(a));
        assert!(doc.is_attached(href));
    }

    #[test]
    fn test_replace_splices_in_place() {
        let mut doc = Document::new();
        let root = doc.root();
        let first = doc.append(root, text("1"), Position::default());
        let middle = doc.append(root, text("2"), Position::default());
        let last = doc.append(root, text("3"), Position::default());

        let x = doc.create(text("x"), Position::default());
        let y = doc.create(text("y"), Position::default());
        doc.replace(middle, vec![x, y]);

        assert_eq!(doc.children(root), &[first, x, y, last]);
        assert!(!doc.is_attached(middle));
        assert_eq!(doc.node(x).level, 1);
    }

    #[test]
    fn test_duplicate_is_deep_and_detached() {
        let mut doc = Document::new();
        let root = doc.root();
        let mixin = doc.append(root, NodeKind::Mixin { name: "m".into() }, Position::default());
        let p = doc.append(mixin, element("p"), Position::default());
        doc.append(p, NodeKind::MixinCall { name: "inner".into() }, Position::default());

        let copy = doc.duplicate(p);
        assert_ne!(copy, p);
        assert_eq!(doc.parent(copy), None);
        assert_eq!(doc.kind(copy), doc.kind(p));
        let copied_call = doc.children(copy)[0];
        assert_eq!(doc.parent(copied_call), Some(copy));
        // The copied call is registered for expansion too
        assert_eq!(doc.mixin_calls.len(), 2);
        assert_eq!(doc.mixin_calls[1], copied_call);
    }

    #[test]
    fn test_graft_from_other_document() {
        let mut other = Document::new();
        let ul = other.append(other.root(), element("ul"), Position::default());
        other.append(ul, element("li"), Position::default());

        let mut doc = Document::new();
        let body = doc.append(doc.root(), element("body"), Position::default());
        let grafted = doc.graft_children(&other, other.root());
        doc.insert_children(body, 0, grafted.clone());

        assert_eq!(doc.children(body), grafted.as_slice());
        let li = doc.children(grafted[0])[0];
        assert_eq!(doc.node(li).level, 3);
        assert!(doc.is_attached(li));
    }

    #[test]
    fn test_descendants_pre_order() {
        let mut doc = Document::new();
        let root = doc.root();
        let a = doc.append(root, element("a"), Position::default());
        let b = doc.append(a, element("b"), Position::default());
        let c = doc.append(root, element("c"), Position::default());
        let order: Vec<_> = doc.descendants(root).collect();
        assert_eq!(order, vec![root, a, b, c]);
        assert_eq!(doc.ancestors(b).collect::<Vec<_>>(), vec![a, root]);
    }

    #[test]
    fn test_set_children_detaches_old() {
        let mut doc = Document::new();
        let block = doc.append(doc.root(), NodeKind::Block { name: Some("x".into()), mode: BlockMode::Replace }, Position::default());
        let old = doc.append(block, text("old"), Position::default());
        let new = doc.create(text("new"), Position::default());
        doc.set_children(block, vec![new]);
        assert!(!doc.is_attached(old));
        assert!(doc.is_attached(new));
    }
}
