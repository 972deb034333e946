//! SQL identifier quoting and validation.
//!
//! Table and column names from entity descriptors are interpolated into
//! rendered SQL, so the registry only accepts plain identifiers and every
//! rendered name is additionally quoted.

use std::sync::OnceLock;

use regex::Regex;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

fn identifier_regex() -> Option<&'static Regex> {
    static REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    REGEX
        .get_or_init(|| match Regex::new(IDENTIFIER_PATTERN) {
            Ok(regex) => Some(regex),
            Err(e) => {
                tracing::warn!(pattern = IDENTIFIER_PATTERN, error = %e, "Identifier regex failed to compile");
                None
            }
        })
        .as_ref()
}

/// Whether `name` is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
///
/// # Examples
///
/// ```
/// use sqlgraph_core::is_valid_identifier;
///
/// assert!(is_valid_identifier("book_authors"));
/// assert!(!is_valid_identifier("1books"));
/// assert!(!is_valid_identifier("books; DROP TABLE x"));
/// ```
pub fn is_valid_identifier(name: &str) -> bool {
    match identifier_regex() {
        Some(regex) => regex.is_match(name),
        None => {
            let mut chars = name.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
    }
}

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// ```
/// use sqlgraph_core::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a SQL identifier using MySQL backtick quoting.
///
/// ```
/// use sqlgraph_core::quote_ident_mysql;
///
/// assert_eq!(quote_ident_mysql("users"), "`users`");
/// assert_eq!(quote_ident_mysql("user`name"), "`user``name`");
/// ```
#[inline]
pub fn quote_ident_mysql(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}
