use super::Compiler;
use crate::ast::{BlockMode, Document, ImportKind, NodeId, NodeKind};
use crate::error::{Error, ErrorKind};
use std::path::Path;
use tracing::debug;

/// Merge a child template into the base it extends.
///
/// Returns the child unchanged when it extends nothing. Otherwise the base is
/// loaded (recursively resolved), the child's named top-level blocks are
/// combined into the base's blocks of the same name, and the child's
/// top-level mixin definitions and code are carried over. Child mixins take
/// precedence over base mixins of the same name. Everything else in the child
/// is discarded.
pub(super) fn resolve(compiler: &Compiler, child: Document, path: Option<&Path>, depth: usize) -> Result<Document, Error> {
    let extends: Vec<NodeId> = child
        .imports
        .iter()
        .copied()
        .filter(|&id| matches!(child.kind(id), NodeKind::Import { kind: ImportKind::Extends, .. }) && child.is_attached(id))
        .collect();

    let Some(&first) = extends.first() else {
        return Ok(child);
    };
    if let Some(&second) = extends.get(1) {
        return Err(Error::compile(
            ErrorKind::MultipleExtends,
            "a template can only extend one base",
            child.node(second).position(),
        ));
    }
    let name = match child.kind(first) {
        NodeKind::Import { path, .. } => path.clone(),
        _ => return Ok(child),
    };
    let position = child.node(first).position();
    let file = compiler.locate(&name, path, position)?;
    compiler.check_depth(depth + 1, position)?;
    let mut base = compiler.load_file(&file, depth + 1)?;
    debug!(base = %file.display(), "extending");

    // Code runs before the base's markup; mixins go last so they override the base's
    let mut code = Vec::new();
    let mut mixins = Vec::new();
    for &id in child.children(child.root()) {
        match child.kind(id) {
            NodeKind::Variable { .. } | NodeKind::Code { .. } => code.push(base.graft(child.subtree(id))),
            NodeKind::Mixin { .. } => mixins.push(base.graft(child.subtree(id))),
            _ => {}
        }
    }
    let root = base.root();
    base.insert_children(root, 0, code);
    let end = base.children(root).len();
    base.insert_children(root, end, mixins);

    for &block in &child.blocks {
        let NodeKind::Block { name: Some(name), mode } = child.kind(block) else {
            continue;
        };
        if !child.is_attached(block) || child.ancestors(block).any(|a| matches!(child.kind(a), NodeKind::Block { .. })) {
            continue;
        }

        let targets: Vec<NodeId> = base
            .blocks
            .iter()
            .copied()
            .filter(|&id| base.is_attached(id))
            .filter(|&id| matches!(base.kind(id), NodeKind::Block { name: Some(n), .. } if n == name))
            .collect();
        if targets.is_empty() {
            debug!(block = %name, "block not defined by the base, discarded");
            continue;
        }

        for target in targets {
            let content = base.graft_children(&child, block);
            let existing = base.children(target).to_vec();
            let merged = match mode {
                BlockMode::Replace => content,
                BlockMode::Append => existing.into_iter().chain(content).collect(),
                BlockMode::Prepend => content.into_iter().chain(existing).collect(),
            };
            base.set_children(target, merged);
        }
        debug!(block = %name, mode = ?mode, "merged block");
    }

    Ok(base)
}
