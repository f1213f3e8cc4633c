//! Annotation extraction
//!
//! Annotations live in single-line comments:
//!
//! ```text
//! //@Package('app.widgets')
//! //@Export('Button')
//! //@Require('app.core.Base')
//! //@Autoload
//! ```
//!
//! Each argument is a quoted string (`'...'` or `"..."`) or a bare number.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static ANNOTATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"//\s*@([a-zA-Z][0-9a-zA-Z]*)(?:\((.*)\))?")
        .expect("annotation pattern is a valid regex")
});

/// Well-known annotation names consumed by the builder
pub mod names {
    pub const PACKAGE: &str = "Package";
    pub const EXPORT: &str = "Export";
    pub const REQUIRE: &str = "Require";
    pub const AUTOLOAD: &str = "Autoload";
}

/// One annotation argument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnotationArg {
    Str(String),
    Number(f64),
}

impl AnnotationArg {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AnnotationArg::Str(s) => Some(s),
            AnnotationArg::Number(_) => None,
        }
    }
}

impl fmt::Display for AnnotationArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationArg::Str(s) => write!(f, "'{}'", s),
            AnnotationArg::Number(n) => write!(f, "{}", n),
        }
    }
}

/// A `@Name(args...)` annotation found in a source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<AnnotationArg>,
}

impl Annotation {
    pub fn new(name: impl Into<String>, arguments: Vec<AnnotationArg>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }
}

/// Malformed annotation arguments on a given line (1-based)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for AnnotationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on line {}", self.message, self.line)
    }
}

/// Extract all annotations from the text of one source file, in file order
pub fn extract_annotations(text: &str) -> Result<Vec<Annotation>, AnnotationError> {
    let mut annotations = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let Some(captures) = ANNOTATION_PATTERN.captures(line) else {
            continue;
        };
        let name = captures[1].to_string();
        let arguments = match captures.get(2) {
            Some(args) => parse_arguments(args.as_str()).map_err(|message| AnnotationError {
                line: idx + 1,
                message,
            })?,
            None => Vec::new(),
        };
        annotations.push(Annotation { name, arguments });
    }
    Ok(annotations)
}

/// Parse a comma-separated list of quoted strings and numbers
fn parse_arguments(text: &str) -> Result<Vec<AnnotationArg>, String> {
    let mut args = Vec::new();
    if text.trim().is_empty() {
        return Ok(args);
    }

    let mut chars = text.char_indices().peekable();
    loop {
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let arg = match chars.peek().copied() {
            Some((start, quote @ ('\'' | '"'))) => {
                chars.next();
                let mut end = None;
                for (i, c) in chars.by_ref() {
                    if c == quote {
                        end = Some(i);
                        break;
                    }
                }
                let end = end.ok_or_else(|| {
                    format!("Unterminated string in parameter '{}'", &text[start..])
                })?;
                AnnotationArg::Str(text[start + 1..end].to_string())
            }
            Some((start, _)) => {
                let mut end = text.len();
                while let Some(&(i, c)) = chars.peek() {
                    if c == ',' {
                        end = i;
                        break;
                    }
                    chars.next();
                }
                let token = text[start..end].trim();
                let value: f64 = token
                    .parse()
                    .map_err(|_| format!("Could not parse parameter '{}'", token))?;
                AnnotationArg::Number(value)
            }
            None => return Err("Empty parameter".to_string()),
        };
        args.push(arg);

        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        match chars.next() {
            None => break,
            Some((_, ',')) => continue,
            Some((i, _)) => {
                return Err(format!(
                    "Unexpected input after parameter: '{}'",
                    &text[i..]
                ))
            }
        }
    }
    Ok(args)
}
