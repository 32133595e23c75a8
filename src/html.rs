/// HTML element and attribute classification for emission.
use serde::{Deserialize, Serialize};

/// Void elements: cannot have children or a closing tag.
/// https://html.spec.whatwg.org/multipage/syntax.html#void-elements
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "command", "embed", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

/// Attributes whose presence alone carries the value.
const BOOLEAN_ATTRIBUTES: &[&str] = &[
    "disabled", "checked", "readonly", "required", "autofocus", "autoplay",
    "controls", "loop", "muted", "selected", "open", "hidden", "async",
    "defer", "novalidate", "formnovalidate", "ismap", "multiple", "reversed",
    "scoped",
];

/// Elements whose content is written exactly as authored, even in pretty mode.
const WHITESPACE_SENSITIVE: &[&str] = &["pre", "textarea", "script", "style"];

/// Markup dialect of the output, chosen by the doctype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Html,
    Xhtml,
    Xml,
}

pub fn is_void_element(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag.to_ascii_lowercase().as_str())
}

pub fn is_boolean_attribute(name: &str) -> bool {
    BOOLEAN_ATTRIBUTES.contains(&name.to_ascii_lowercase().as_str())
}

pub fn is_whitespace_sensitive(tag: &str) -> bool {
    WHITESPACE_SENSITIVE.contains(&tag.to_ascii_lowercase().as_str())
}

/// Declaration and output mode for a doctype name; unknown names are passed through
pub fn doctype(name: &str) -> (String, Mode) {
    let declaration = match name.to_ascii_lowercase().as_str() {
        "html" | "5" => return ("<!DOCTYPE html>".to_string(), Mode::Html),
        "xml" => return (r#"<?xml version="1.0" encoding="utf-8" ?>"#.to_string(), Mode::Xml),
        "transitional" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Transitional//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-transitional.dtd">"#
        }
        "strict" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Strict//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-strict.dtd">"#
        }
        "frameset" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.0 Frameset//EN" "http://www.w3.org/TR/xhtml1/DTD/xhtml1-frameset.dtd">"#
        }
        "1.1" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">"#
        }
        "basic" => {
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML Basic 1.1//EN" "http://www.w3.org/TR/xhtml-basic/xhtml-basic11.dtd">"#
        }
        "mobile" => {
            r#"<!DOCTYPE html PUBLIC "-//WAPFORUM//DTD XHTML Mobile 1.2//EN" "http://www.openmobilealliance.org/tech/DTD/xhtml-mobile12.dtd">"#
        }
        _ => return (format!("<!DOCTYPE {name}>"), Mode::Html),
    };
    (declaration.to_string(), Mode::Xhtml)
}

/// Escape text for use in markup and quoted attribute values
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doctype_modes() {
        assert_eq!(doctype("html"), ("<!DOCTYPE html>".to_string(), Mode::Html));
        assert_eq!(doctype("5").1, Mode::Html);
        assert_eq!(doctype("xml").1, Mode::Xml);
        assert_eq!(doctype("Strict").1, Mode::Xhtml);
        assert_eq!(doctype("svg"), ("<!DOCTYPE svg>".to_string(), Mode::Html));
    }

    #[test]
    fn test_classification_ignores_case() {
        assert!(is_void_element("BR"));
        assert!(!is_void_element("div"));
        assert!(is_boolean_attribute("Checked"));
        assert!(is_whitespace_sensitive("pre"));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"<a href="x">&'"#), "&lt;a href=&quot;x&quot;&gt;&amp;&#039;");
    }
}
