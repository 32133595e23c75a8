//! Inline expansion of mixin calls.

use super::CompilerOptions;
use crate::ast::{Document, NodeId, NodeKind, Position};
use crate::error::{Error, ErrorKind};
use crate::expression::{self, Value};
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// A declared mixin parameter: `$name`, `$name = default` or `...$rest`
#[derive(Debug, Clone, PartialEq)]
struct Parameter {
    name: String,
    default: Option<String>,
    variadic: bool,
}

impl Parameter {
    fn new(raw: &str, default: Option<String>) -> Self {
        let raw = raw.trim();
        let (variadic, raw) = match raw.strip_prefix("...") {
            Some(rest) => (true, rest.trim()),
            None => (false, raw),
        };
        let name = if raw.starts_with('$') { raw.to_string() } else { format!("${raw}") };
        Self { name, default, variadic }
    }

    fn matches(&self, name: &str) -> bool {
        self.name.trim_start_matches('$') == name.trim_start_matches('$')
    }
}

/// Arguments written at a call site
#[derive(Debug, Default)]
struct Arguments {
    positional: Vec<String>,
    named: Vec<(String, String)>,
    /// `&attributes(...)` expressions
    spreads: Vec<String>,
}

/// Replace every reachable mixin call by its definition's body, then drop the definitions.
///
/// Calls produced by an expansion are expanded in turn, one level deeper.
pub(super) fn expand(document: &mut Document, options: &CompilerOptions) -> Result<(), Error> {
    let quote = options.formatter.code_quote_style;
    let definitions = definitions(document);

    let mut scopes = 0;
    let mut queue: VecDeque<(NodeId, usize)> = document
        .mixin_calls
        .iter()
        .copied()
        .filter(|&call| is_live(document, call))
        .map(|call| (call, 1))
        .collect();

    while let Some((call, depth)) = queue.pop_front() {
        if !is_live(document, call) {
            continue;
        }
        let NodeKind::MixinCall { name } = document.kind(call).clone() else {
            continue;
        };
        let position = document.node(call).position();

        if depth > options.max_mixin_depth {
            return Err(Error::compile(
                ErrorKind::DepthExceeded,
                format!("mixin `{name}` nests deeper than {} levels", options.max_mixin_depth),
                position,
            )
            .with_help("mixins are expanded at compile time, so a mixin cannot call itself without limit"));
        }
        let Some(&definition) = definitions.get(&name) else {
            let mut known: Vec<&str> = definitions.keys().map(String::as_str).collect();
            known.sort_unstable();
            let error = Error::compile(ErrorKind::UndefinedMixin, format!("mixin `{name}` is not defined"), position);
            return Err(if known.is_empty() {
                error
            } else {
                error.with_help(format!("defined mixins: {}", known.join(", ")))
            });
        };

        let first_new = document.mixin_calls.len();
        scopes += 1;
        let stash = format!("$__mixin{scopes}");
        let replacement = instantiate(document, definition, call, position, &stash, quote);
        document.replace(call, replacement);

        let nested: Vec<NodeId> = document.mixin_calls[first_new..]
            .iter()
            .copied()
            .filter(|&id| is_live(document, id))
            .collect();
        debug!(mixin = %name, depth, nested = nested.len(), "expanded mixin call");
        queue.extend(nested.into_iter().map(|id| (id, depth + 1)));
    }

    let attached: Vec<NodeId> = document
        .mixins
        .iter()
        .copied()
        .filter(|&id| document.is_attached(id))
        .collect();
    for id in attached {
        document.detach(id);
    }
    Ok(())
}

/// Definitions by name in document order; a later definition wins
fn definitions(document: &Document) -> HashMap<String, NodeId> {
    let mut definitions = HashMap::new();
    for id in document.descendants(document.root()) {
        if let NodeKind::Mixin { name } = document.kind(id) {
            if definitions.insert(name.clone(), id).is_some() {
                debug!(mixin = %name, "mixin redefined");
            }
        }
    }
    definitions
}

/// Attached and not part of a mixin definition
fn is_live(document: &Document, id: NodeId) -> bool {
    document.is_attached(id)
        && !document
            .ancestors(id)
            .any(|ancestor| matches!(document.kind(ancestor), NodeKind::Mixin { .. }))
}

fn parameters(document: &Document, definition: NodeId) -> Vec<Parameter> {
    document
        .attributes(definition)
        .iter()
        .filter_map(|&id| match document.kind(id) {
            NodeKind::Attribute { name: Some(name), value, .. } => Some(Parameter::new(name, value.clone())),
            NodeKind::Attribute { name: None, value: Some(value), .. } => Some(Parameter::new(value, None)),
            _ => None,
        })
        .collect()
}

fn arguments(document: &Document, call: NodeId) -> Arguments {
    let mut arguments = Arguments::default();
    for &id in document.attributes(call) {
        match document.kind(id) {
            NodeKind::Attribute { name: None, value: Some(value), .. } => arguments.positional.push(value.clone()),
            NodeKind::Attribute { name: Some(name), value, .. } => {
                let value = value.clone().unwrap_or_else(|| "true".to_string());
                arguments.named.push((name.clone(), value));
            }
            NodeKind::Assignment { .. } => {
                for &inner in document.attributes(id) {
                    if let NodeKind::Attribute { name, value, .. } = document.kind(inner) {
                        if let Some(expression) = value.as_ref().or(name.as_ref()) {
                            arguments.spreads.push(expression.trim().to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }
    arguments
}

/// Build the nodes that replace `call`: parameter bindings followed by a copy of the body.
///
/// Bound names are saved into `stash` first and restored after the body, so the
/// caller's variables are untouched and unsupplied parameters resolve at runtime.
fn instantiate(
    document: &mut Document,
    definition: NodeId,
    call: NodeId,
    position: Position,
    stash: &str,
    quote: char,
) -> Vec<NodeId> {
    let parameters = parameters(document, definition);
    let Arguments { positional, named, spreads } = arguments(document, call);

    let mut values: Vec<Option<String>> = vec![None; parameters.len()];
    let mut positional = positional.into_iter();
    for (slot, parameter) in values.iter_mut().zip(&parameters) {
        if parameter.variadic {
            break;
        }
        match positional.next() {
            Some(value) => *slot = Some(expression::code_value(&value, quote)),
            None => break,
        }
    }
    let rest: Vec<String> = positional.map(|value| expression::code_value(&value, quote)).collect();

    let mut extra: Vec<(String, String)> = Vec::new();
    for (name, value) in named {
        match parameters.iter().position(|p| !p.variadic && p.matches(&name)) {
            Some(index) if values[index].is_none() => values[index] = Some(expression::code_value(&value, quote)),
            _ => extra.push((name, value)),
        }
    }

    match parameters.iter().position(|p| p.variadic) {
        Some(index) => values[index] = Some(format!("[{}]", rest.join(", "))),
        None if !rest.is_empty() => debug!(count = rest.len(), "extra mixin arguments ignored"),
        None => {}
    }

    for (slot, parameter) in values.iter_mut().zip(&parameters) {
        if slot.is_none() {
            *slot = parameter.default.as_ref().map(|default| expression::code_value(default, quote));
        }
    }

    let mut bindings: Vec<(String, String)> = parameters
        .iter()
        .zip(values)
        .filter_map(|(parameter, value)| Some((parameter.name.clone(), value?)))
        .collect();
    if !extra.is_empty() || !spreads.is_empty() || uses_attributes(document, definition) {
        bindings.push(("$attributes".to_string(), attributes_array(&extra, &spreads, quote)));
    }

    let scoped = if bindings.is_empty() {
        None
    } else {
        let names: Vec<&str> = bindings.iter().map(|(name, _)| name.as_str()).collect();
        let (save, restore) = scope(&names, stash, quote);
        Some((document.create(NodeKind::Code { value: save, block: false }, position), restore))
    };

    let mut nodes: Vec<NodeId> = scoped.iter().map(|&(save, _)| save).collect();
    nodes.extend(
        bindings
            .into_iter()
            .map(|(name, value)| document.create(NodeKind::Variable { name, value }, position)),
    );

    let body: Vec<NodeId> = document.children(definition).to_vec();
    let copies: Vec<NodeId> = body.into_iter().map(|id| document.duplicate(id)).collect();

    let content: Vec<NodeId> = document.children(call).to_vec();
    if !content.is_empty() {
        for slot in slots(document, &copies) {
            let filled = content.iter().map(|&id| document.duplicate(id)).collect();
            document.set_children(slot, filled);
        }
    }

    nodes.extend(copies);
    if let Some((_, value)) = scoped {
        nodes.push(document.create(NodeKind::Code { value, block: false }, position));
    }
    nodes
}

/// Statements that save the caller's values of `names` and put them back afterwards.
///
/// Names the caller never defined are unset again on the way out.
fn scope(names: &[&str], stash: &str, quote: char) -> (String, String) {
    let keys: Vec<String> = names
        .iter()
        .map(|name| expression::code_string(name.trim_start_matches('$'), quote))
        .collect();
    let save = format!("{stash} = array_intersect_key(get_defined_vars(), array_flip([{}]));", keys.join(", "));
    let restore = format!("unset({}); extract({stash}); unset({stash});", names.join(", "));
    (save, restore)
}

/// Unnamed blocks inside the copied body, outside nested definitions
fn slots(document: &Document, roots: &[NodeId]) -> Vec<NodeId> {
    roots
        .iter()
        .flat_map(|&root| document.descendants(root))
        .filter(|&id| matches!(document.kind(id), NodeKind::Block { name: None, .. }))
        .filter(|&id| {
            !document
                .ancestors(id)
                .any(|ancestor| matches!(document.kind(ancestor), NodeKind::Mixin { .. }))
        })
        .collect()
}

/// `$attributes` value for named arguments that match no parameter
fn attributes_array(extra: &[(String, String)], spreads: &[String], quote: char) -> String {
    let mut merged: Vec<(&str, Vec<&str>)> = Vec::new();
    for (name, value) in extra {
        match merged.iter_mut().find(|entry| entry.0 == name.as_str()) {
            Some((_, values)) if name == "class" || name == "style" => values.push(value.as_str()),
            Some((_, values)) => *values = vec![value.as_str()],
            None => merged.push((name.as_str(), vec![value.as_str()])),
        }
    }

    let entries: Vec<String> = merged
        .iter()
        .map(|(name, values)| {
            let separator = if *name == "style" { "; " } else { " " };
            format!("{} => {}", expression::code_string(name, quote), join_values(values, separator, quote))
        })
        .collect();
    let array = format!("[{}]", entries.join(", "));

    if spreads.is_empty() {
        array
    } else {
        let spreads: Vec<String> = spreads.iter().map(|spread| format!("(array) ({spread})")).collect();
        format!("array_merge({array}, {})", spreads.join(", "))
    }
}

/// One PHP value for several attribute values; folded at compile time when all are literal
fn join_values(values: &[&str], separator: &str, quote: char) -> String {
    let literals: Option<Vec<String>> = values
        .iter()
        .map(|value| match expression::classify(value) {
            Value::Literal(text) => Some(text),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
        .collect();
    match literals {
        Some(parts) => expression::code_string(&parts.join(separator), quote),
        None => {
            let glue = format!(" . {} . ", expression::code_string(separator, quote));
            values
                .iter()
                .map(|value| expression::code_value(value, quote))
                .collect::<Vec<_>>()
                .join(&glue)
        }
    }
}

/// Whether the definition reads `$attributes` anywhere
fn uses_attributes(document: &Document, definition: NodeId) -> bool {
    fn mentions(kind: &NodeKind) -> bool {
        let text = match kind {
            NodeKind::Attribute { value: Some(value), .. } => value,
            NodeKind::Attribute { name: Some(name), .. } => name,
            NodeKind::Text { value, .. }
            | NodeKind::Expression { value, .. }
            | NodeKind::Code { value, .. }
            | NodeKind::Variable { value, .. } => value,
            NodeKind::Conditional { subject: Some(subject), .. }
            | NodeKind::When { subject: Some(subject) } => subject,
            NodeKind::Each { subject, .. }
            | NodeKind::Case { subject }
            | NodeKind::While { subject }
            | NodeKind::For { subject } => subject,
            _ => return false,
        };
        text.contains("$attributes")
    }

    document.descendants(definition).any(|id| {
        mentions(document.kind(id))
            || document.attributes(id).iter().any(|&attribute| {
                mentions(document.kind(attribute))
                    || document.attributes(attribute).iter().any(|&inner| mentions(document.kind(inner)))
            })
    })
}
