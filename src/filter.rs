//! Named text transforms applied to filter blocks and filtered includes.

use crate::html::Mode;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Options written in a filter's attribute list, `:css(media=print)`
pub type FilterOptions = BTreeMap<String, String>;

/// Where a filter is being applied
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub mode: Mode,
    pub pretty: bool,
    /// File the raw text was read from, for filtered includes
    pub path: Option<&'a Path>,
}

/// A text transform. Its output is written to the compiled template verbatim.
pub trait Filter {
    fn apply(&self, text: &str, context: &FilterContext<'_>, options: &FilterOptions) -> String;
}

impl<F> Filter for F
where
    F: Fn(&str, &FilterContext<'_>, &FilterOptions) -> String,
{
    fn apply(&self, text: &str, context: &FilterContext<'_>, options: &FilterOptions) -> String {
        self(text, context, options)
    }
}

struct Plain;

impl Filter for Plain {
    fn apply(&self, text: &str, _: &FilterContext<'_>, _: &FilterOptions) -> String {
        text.to_string()
    }
}

struct Cdata;

impl Filter for Cdata {
    fn apply(&self, text: &str, _: &FilterContext<'_>, _: &FilterOptions) -> String {
        format!("<![CDATA[{text}]]>")
    }
}

/// Wraps the text in an element, `<style>` or `<script>`
struct Wrap {
    tag: &'static str,
    mime: &'static str,
}

impl Filter for Wrap {
    fn apply(&self, text: &str, context: &FilterContext<'_>, options: &FilterOptions) -> String {
        let mut open = format!("<{}", self.tag);
        if context.mode != Mode::Html {
            open.push_str(&format!(" type=\"{}\"", self.mime));
        }
        for (name, value) in options {
            open.push_str(&format!(" {}=\"{}\"", name, crate::html::escape(value)));
        }
        let break_line = if context.pretty { "\n" } else { "" };
        format!("{open}>{break_line}{text}{break_line}</{}>", self.tag)
    }
}

struct Php;

impl Filter for Php {
    fn apply(&self, text: &str, _: &FilterContext<'_>, _: &FilterOptions) -> String {
        format!("<?php {}?>", text.trim_end())
    }
}

/// Filters by name
pub struct Filters {
    filters: HashMap<String, Box<dyn Filter>>,
}

impl Filters {
    /// Registry without any filters
    pub fn empty() -> Self {
        Self { filters: HashMap::new() }
    }

    pub fn register(&mut self, name: impl Into<String>, filter: impl Filter + 'static) {
        self.filters.insert(name.into(), Box::new(filter));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Filter> {
        self.filters.get(name).map(|f| f.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for Filters {
    fn default() -> Self {
        let mut filters = Self::empty();
        filters.register("plain", Plain);
        filters.register("cdata", Cdata);
        filters.register("css", Wrap { tag: "style", mime: "text/css" });
        filters.register("js", Wrap { tag: "script", mime: "text/javascript" });
        filters.register("php", Php);
        filters.register("code", Php);
        filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(mode: Mode) -> FilterContext<'static> {
        FilterContext { mode, pretty: false, path: None }
    }

    #[test]
    fn test_builtins() {
        let filters = Filters::default();
        let options = FilterOptions::new();
        let apply = |name: &str, text: &str, mode| {
            filters.get(name).unwrap().apply(text, &context(mode), &options)
        };
        assert_eq!(apply("plain", "a < b", Mode::Html), "a < b");
        assert_eq!(apply("css", "p{}", Mode::Html), "<style>p{}</style>");
        assert_eq!(apply("js", "go()", Mode::Xhtml), "<script type=\"text/javascript\">go()</script>");
        assert_eq!(apply("php", "echo 1;", Mode::Html), "<?php echo 1;?>");
        assert_eq!(apply("cdata", "x", Mode::Xml), "<![CDATA[x]]>");
        assert_eq!(filters.names(), vec!["cdata", "code", "css", "js", "php", "plain"]);
    }

    #[test]
    fn test_options_become_attributes() {
        let filters = Filters::default();
        let mut options = FilterOptions::new();
        options.insert("media".into(), "print".into());
        let out = filters.get("css").unwrap().apply("p{}", &context(Mode::Html), &options);
        assert_eq!(out, "<style media=\"print\">p{}</style>");
    }

    #[test]
    fn test_closure_filter() {
        let mut filters = Filters::empty();
        filters.register("upper", |text: &str, _: &FilterContext<'_>, _: &FilterOptions| text.to_uppercase());
        let out = filters.get("upper").unwrap().apply("shout", &context(Mode::Html), &FilterOptions::new());
        assert_eq!(out, "SHOUT");
        assert!(filters.get("plain").is_none());
    }
}
