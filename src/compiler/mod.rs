//! Multi-pass compilation: includes, then extends/blocks, then mixins, then emission.

mod extends;
mod imports;
mod mixins;

use crate::ast::{Document, Position};
use crate::error::{Error, ErrorKind};
use crate::filter::{Filter, FilterContext, FilterOptions, Filters};
use crate::generate::{FormatterOptions, GenerateOptions, Generator, PhpGenerator};
use crate::html::Mode;
use crate::parser::{JadeParser, Parser};
use crate::resolver::Resolver;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, debug_span};

/// Configuration for compilation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerOptions {
    /// Directories searched for included and extended templates
    pub paths: Vec<PathBuf>,
    /// Extensions tried after the exact file name, in order
    pub extensions: Vec<String>,
    pub formatter: FormatterOptions,
    /// Output mode; taken from the first doctype when not set
    pub mode: Option<Mode>,
    /// Maximum include/extends nesting
    pub max_depth: usize,
    /// Maximum nesting of mixin calls expanded inside mixins
    pub max_mixin_depth: usize,
    pub escape_charset: String,
    /// Included files with these extensions go through the named filter instead of the parser
    pub filter_map: BTreeMap<String, String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        let filter_map = [("css", "css"), ("js", "js"), ("php", "php"), ("txt", "plain")]
            .into_iter()
            .map(|(ext, filter)| (ext.to_string(), filter.to_string()))
            .collect();
        Self {
            paths: Vec::new(),
            extensions: vec![".jade".to_string(), ".pug".to_string()],
            formatter: FormatterOptions::default(),
            mode: None,
            max_depth: 16,
            max_mixin_depth: 32,
            escape_charset: "UTF-8".to_string(),
            filter_map,
        }
    }
}

/// Template compiler.
///
/// Holds no per-compile state; every call builds its own documents.
pub struct Compiler {
    options: CompilerOptions,
    resolver: Resolver,
    filters: Filters,
    parser: JadeParser,
}

impl Compiler {
    pub fn new(options: CompilerOptions) -> Self {
        let resolver = Resolver::new(options.paths.clone());
        Self {
            options,
            resolver,
            filters: Filters::default(),
            parser: JadeParser::new(),
        }
    }

    /// Register a filter, replacing any built-in of the same name
    pub fn filter(mut self, name: impl Into<String>, filter: impl Filter + 'static) -> Self {
        self.filters.register(name, filter);
        self
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    pub fn compile(&self, source: &str) -> Result<String, Error> {
        let document = self.document(source)?;
        self.generate(&document)
    }

    pub fn compile_file(&self, path: &Path) -> Result<String, Error> {
        let document = self.document_file(path)?;
        self.generate(&document).map_err(|err| err.in_file(Some(path)))
    }

    /// Parse and resolve a template without emitting it
    pub fn document(&self, source: &str) -> Result<Document, Error> {
        let mut document = self.load(source, None, 0)?;
        mixins::expand(&mut document, &self.options)?;
        Ok(document)
    }

    pub fn document_file(&self, path: &Path) -> Result<Document, Error> {
        let mut document = self.load_file(path, 0)?;
        mixins::expand(&mut document, &self.options).map_err(|err| err.in_file(Some(path)))?;
        Ok(document)
    }

    fn generate(&self, document: &Document) -> Result<String, Error> {
        let options = GenerateOptions {
            formatter: self.options.formatter.clone(),
            mode: self.options.mode,
            escape_charset: self.options.escape_charset.clone(),
        };
        PhpGenerator::new(&self.filters).generate(document, &options)
    }

    /// Parse, then resolve includes and extends
    fn load(&self, source: &str, path: Option<&Path>, depth: usize) -> Result<Document, Error> {
        let _span = debug_span!("load", path = ?path, depth).entered();
        let mut document = self.parser.parse(source)?;
        imports::resolve(self, &mut document, path, depth)?;
        extends::resolve(self, document, path, depth)
    }

    fn load_file(&self, path: &Path, depth: usize) -> Result<Document, Error> {
        let source = fs::read_to_string(path).map_err(|err| Error::io(path, err))?;
        self.load(&source, Some(path), depth)
            .map_err(|err| err.in_file(Some(path)))
    }

    /// Find an included or extended template, next to `from` first
    fn locate(&self, name: &str, from: Option<&Path>, position: Position) -> Result<PathBuf, Error> {
        let extensions = &self.options.extensions;
        let found = match from.and_then(Path::parent) {
            Some(dir) => self.resolver.resolve_from(dir, name, extensions),
            None => self.resolver.resolve(name, extensions),
        };
        found.ok_or_else(|| {
            let mut searched: Vec<String> = from
                .and_then(Path::parent)
                .into_iter()
                .chain(self.resolver.paths().iter().map(PathBuf::as_path))
                .map(|dir| dir.display().to_string())
                .collect();
            if searched.is_empty() {
                searched.push("(no search paths configured)".to_string());
            }
            Error::compile(ErrorKind::ImportNotFound, format!("cannot find template `{name}`"), position)
                .with_help(format!("searched: {}", searched.join(", ")))
        })
    }

    fn check_depth(&self, depth: usize, position: Position) -> Result<(), Error> {
        if depth > self.options.max_depth {
            return Err(Error::compile(
                ErrorKind::DepthExceeded,
                format!("templates nest deeper than {} levels", self.options.max_depth),
                position,
            )
            .with_help("check for a template that includes or extends itself"));
        }
        Ok(())
    }

    /// Run a filter over raw file contents
    fn apply_filter(&self, name: &str, text: &str, path: &Path, position: Position) -> Result<String, Error> {
        let filter = self.filters.get(name).ok_or_else(|| {
            Error::compile(ErrorKind::UnknownFilter, format!("no filter named `{name}`"), position)
                .with_help(format!("available filters: {}", self.filters.names().join(", ")))
        })?;
        let context = FilterContext {
            mode: self.options.mode.unwrap_or_default(),
            pretty: self.options.formatter.pretty,
            path: Some(path),
        };
        debug!(filter = name, path = %path.display(), "filtering include");
        Ok(filter.apply(text, &context, &FilterOptions::new()))
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new(CompilerOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: CompilerOptions =
            serde_json::from_str(r#"{"paths": ["views"], "formatter": {"pretty": true}, "mode": "xhtml"}"#).unwrap();
        assert_eq!(options.paths, vec![PathBuf::from("views")]);
        assert!(options.formatter.pretty);
        assert_eq!(options.mode, Some(Mode::Xhtml));
        assert_eq!(options.max_depth, 16);
        assert_eq!(options.extensions, vec![".jade", ".pug"]);
        assert_eq!(options.filter_map.get("txt").map(String::as_str), Some("plain"));
    }

    #[test]
    fn test_custom_filter() {
        let compiler = Compiler::default()
            .filter("upper", |text: &str, _: &FilterContext<'_>, _: &FilterOptions| text.to_uppercase());
        assert_eq!(compiler.compile(":upper\n  loud").unwrap(), "LOUD");
    }

    #[test]
    fn test_include_without_paths() {
        let err = Compiler::default().compile("include missing").unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::ImportNotFound));
        let help = err.diagnostic().and_then(|d| d.help.clone()).unwrap();
        assert!(help.contains("no search paths"));
    }
}
