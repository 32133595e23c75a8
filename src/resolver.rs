use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

type CacheKey = (Option<PathBuf>, String, Vec<String>);

/// Locates template files on a list of search directories.
///
/// Lookups are cached per resolver; the cache only ever records what the
/// filesystem reported, so a resolver should not outlive changes to the
/// directories it searches.
#[derive(Debug, Default)]
pub struct Resolver {
    paths: Vec<PathBuf>,
    cache: RefCell<HashMap<CacheKey, Option<PathBuf>>>,
}

impl Resolver {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            cache: RefCell::new(HashMap::new()),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Find `name` in the search directories.
    ///
    /// Each directory is checked for `name` as given, then for `name` with each
    /// extension appended in order. Returns the canonical path of the first
    /// existing file.
    pub fn resolve(&self, name: &str, extensions: &[String]) -> Option<PathBuf> {
        self.lookup(None, name, extensions)
    }

    /// Like `resolve`, but searches `base` before the configured directories
    pub fn resolve_from(&self, base: &Path, name: &str, extensions: &[String]) -> Option<PathBuf> {
        self.lookup(Some(base), name, extensions)
    }

    fn lookup(&self, base: Option<&Path>, name: &str, extensions: &[String]) -> Option<PathBuf> {
        let key = (base.map(Path::to_path_buf), name.to_string(), extensions.to_vec());
        if let Some(hit) = self.cache.borrow().get(&key) {
            return hit.clone();
        }

        let found = if Path::new(name).is_absolute() {
            find_in(Path::new(""), name, extensions)
        } else {
            base.into_iter()
                .chain(self.paths.iter().map(PathBuf::as_path))
                .find_map(|dir| find_in(dir, name, extensions))
        };

        self.cache.borrow_mut().insert(key, found.clone());
        found
    }
}

fn find_in(dir: &Path, name: &str, extensions: &[String]) -> Option<PathBuf> {
    let exact = dir.join(name);
    if exact.is_file() {
        return exact.canonicalize().ok();
    }
    extensions
        .iter()
        .map(|ext| normalize_extension(ext))
        .filter(|ext| !name.ends_with(ext.as_str()))
        .map(|ext| dir.join(format!("{name}{ext}")))
        .find(|candidate| candidate.is_file())
        .and_then(|candidate| candidate.canonicalize().ok())
}

/// `css` and `.css` both mean `.css`
fn normalize_extension(ext: &str) -> String {
    if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{ext}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixtures() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/resolver")
    }

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_resolve_exact_and_extension() {
        let resolver = Resolver::new(vec![fixtures()]);
        let css = fixtures().join("test-1.css").canonicalize().unwrap();
        let jade = fixtures().join("test-1.jade").canonicalize().unwrap();

        assert_eq!(resolver.resolve("test-1.css", &exts(&["css"])), Some(css.clone()));
        assert_eq!(resolver.resolve("test-1", &exts(&["css"])), Some(css));
        assert_eq!(resolver.resolve("test-1", &exts(&[".jade"])), Some(jade));
    }

    #[test]
    fn test_resolve_absent() {
        let resolver = Resolver::new(vec![fixtures()]);
        assert_eq!(resolver.resolve("test-2", &exts(&["jade"])), None);
        assert_eq!(resolver.resolve("test-1", &exts(&["xyz"])), None);
    }

    #[test]
    fn test_resolve_subdirectory_and_base() {
        let resolver = Resolver::new(vec![fixtures()]);
        let php = fixtures().join("test-sub/test-2.php").canonicalize().unwrap();
        assert_eq!(resolver.resolve("test-sub/test-2", &exts(&["php"])), Some(php.clone()));

        let bare = Resolver::default();
        assert_eq!(bare.resolve("test-2", &exts(&["php"])), None);
        assert_eq!(bare.resolve_from(&fixtures().join("test-sub"), "test-2", &exts(&["php"])), Some(php));
    }

    #[test]
    fn test_extension_order_decides() {
        let resolver = Resolver::new(vec![fixtures()]);
        let found = resolver.resolve("test-1", &exts(&["jade", "css"])).unwrap();
        assert_eq!(found.extension().unwrap(), "jade");
        // Cached answer is the same
        assert_eq!(resolver.resolve("test-1", &exts(&["jade", "css"])), Some(found));
    }
}
