use super::Compiler;
use crate::ast::{Document, ImportKind, NodeId, NodeKind};
use crate::error::Error;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Replace every attached `include` with the included content.
///
/// Templates are parsed and fully resolved (their own includes and extends
/// included); files whose extension maps to a filter, or includes naming a
/// filter explicitly, are inserted as filtered raw text.
pub(super) fn resolve(compiler: &Compiler, document: &mut Document, path: Option<&Path>, depth: usize) -> Result<(), Error> {
    let includes: Vec<NodeId> = document
        .imports
        .iter()
        .copied()
        .filter(|&id| matches!(document.kind(id), NodeKind::Import { kind: ImportKind::Include, .. }))
        .collect();

    for id in includes {
        if !document.is_attached(id) {
            continue;
        }
        let NodeKind::Import { path: name, filter, .. } = document.kind(id).clone() else {
            continue;
        };
        let position = document.node(id).position();
        let file = compiler.locate(&name, path, position)?;

        let filter = filter.or_else(|| {
            let extension = file.extension()?.to_str()?;
            compiler.options.filter_map.get(extension).cloned()
        });

        let nodes = match filter {
            Some(filter) => {
                let raw = fs::read_to_string(&file).map_err(|err| Error::io(&file, err))?;
                let value = compiler.apply_filter(&filter, &raw, &file, position)?;
                vec![document.create(NodeKind::Text { value, verbatim: true }, position)]
            }
            None => {
                compiler.check_depth(depth + 1, position)?;
                let included = compiler.load_file(&file, depth + 1)?;
                document.graft_children(&included, included.root())
            }
        };
        debug!(include = %name, file = %file.display(), nodes = nodes.len(), "resolved include");
        document.replace(id, nodes);
    }
    Ok(())
}
