//! Acceptance rules for source keys.
//!
//! Validation never fails with an error: [`validate_source_key`] returns the
//! list of violated rules and [`is_valid_source_key`] collapses it to a bool.
//! Callers turn a rejection into [`ParseError::InvalidKey`](crate::error::ParseError).

use std::fmt;

/// A single rule broken by a candidate source key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Key is empty or consists only of `/`
    Empty,
    /// Key contains a character outside `[A-Za-z0-9_./]`
    InvalidCharacter(char),
    /// Key contains `//`
    DuplicateSlash,
    /// Key contains `..`
    DuplicateDot,
    /// A directory segment contains `.`
    DottedDirectory(String),
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::Empty => write!(f, "key is empty"),
            Violation::InvalidCharacter(c) => write!(f, "invalid character {:?}", c),
            Violation::DuplicateSlash => write!(f, "key contains '//'"),
            Violation::DuplicateDot => write!(f, "key contains '..'"),
            Violation::DottedDirectory(dir) => {
                write!(f, "directory '{}' must not contain '.'", dir)
            }
        }
    }
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '/'
}

/// Collect every rule the key violates. An empty list means the key is valid.
pub fn validate_source_key(path: &str) -> Vec<Violation> {
    if path.is_empty() || path.chars().all(|c| c == '/') {
        return vec![Violation::Empty];
    }

    let mut violations = Vec::new();

    if let Some(c) = path.chars().find(|c| !is_key_char(*c)) {
        violations.push(Violation::InvalidCharacter(c));
    }
    if path.contains("//") {
        violations.push(Violation::DuplicateSlash);
    }
    if path.contains("..") {
        violations.push(Violation::DuplicateDot);
    }

    // Every segment but the last is a directory
    let mut segments: Vec<&str> = path.split('/').collect();
    segments.pop();
    for dir in segments.into_iter().filter(|s| s.contains('.')) {
        violations.push(Violation::DottedDirectory(dir.to_string()));
    }

    violations
}

/// Check whether `path` is an acceptable source key.
pub fn is_valid_source_key(path: &str) -> bool {
    validate_source_key(path).is_empty()
}

/// Check whether `name` is an acceptable directory name (also used for
/// source mount names).
pub fn is_valid_directory_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
