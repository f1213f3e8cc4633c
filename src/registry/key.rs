//! Dotted export keys
//!
//! `"pkg.sub.Name"` names export `Name` of package `pkg.sub`, `"pkg.sub.*"`
//! names every export of `pkg.sub`, and a key without a dot lives in the
//! root package.

use std::fmt;

/// Name of the root package
pub const ROOT_PACKAGE: &str = "";

/// Export name that selects a whole package
pub const WILDCARD: &str = "*";

/// Parsed `(package, export)` key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    raw: String,
    package_name: String,
    export_name: String,
}

impl Key {
    /// Parse a dotted key; everything after the last dot is the export name
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let (package_name, export_name) = match raw.rfind('.') {
            Some(idx) => (raw[..idx].to_string(), raw[idx + 1..].to_string()),
            None => (ROOT_PACKAGE.to_string(), raw.clone()),
        };
        Self {
            raw,
            package_name,
            export_name,
        }
    }

    /// Build a key from its parts
    pub fn from_parts(package_name: &str, export_name: &str) -> Self {
        let raw = if package_name.is_empty() {
            export_name.to_string()
        } else {
            format!("{}.{}", package_name, export_name)
        };
        Self {
            raw,
            package_name: package_name.to_string(),
            export_name: export_name.to_string(),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn package_name(&self) -> &str {
        &self.package_name
    }

    pub fn export_name(&self) -> &str {
        &self.export_name
    }

    pub fn is_wildcard(&self) -> bool {
        self.export_name == WILDCARD
    }

    /// A key usable for export registration: non-empty export name, no
    /// empty package segments, not a wildcard
    pub fn is_valid_export(&self) -> bool {
        !self.export_name.is_empty()
            && !self.is_wildcard()
            && if self.package_name.is_empty() {
                !self.raw.starts_with('.')
            } else {
                self.package_name.split('.').all(|segment| !segment.is_empty())
            }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for Key {
    fn from(raw: &str) -> Self {
        Key::new(raw)
    }
}

impl From<String> for Key {
    fn from(raw: String) -> Self {
        Key::new(raw)
    }
}
