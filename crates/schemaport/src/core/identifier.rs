//! Identifier validation and quoting.
//!
//! SQL identifiers cannot be bound as parameters, so every table, column and
//! index name that reaches generated SQL passes through this module. Quoting is
//! idempotent: a name that is already wrapped in the dialect's quote character
//! (with correctly doubled inner quotes) is returned unchanged, never quoted twice.

use crate::error::{PortError, Result};

/// Maximum identifier length (PostgreSQL truncates at 63 bytes, MySQL at 64 chars).
const MAX_IDENTIFIER_LENGTH: usize = 64;

/// Words reserved by at least one supported engine.
///
/// Sorted so lookups can binary search.
const RESERVED_WORDS: &[&str] = &[
    "add", "all", "alter", "analyze", "and", "as", "asc", "autoincrement", "between", "by",
    "case", "cast", "check", "collate", "column", "constraint", "create", "cross", "current",
    "current_date", "current_time", "current_timestamp", "current_user", "database", "default",
    "delete", "desc", "distinct", "drop", "else", "end", "except", "exists", "false", "fetch",
    "for", "foreign", "from", "full", "grant", "group", "having", "in", "index", "inner",
    "insert", "intersect", "into", "is", "join", "key", "keys", "left", "like", "limit",
    "natural", "not", "null", "offset", "on", "or", "order", "outer", "primary", "range",
    "references", "rename", "replace", "right", "row", "rows", "select", "set", "table",
    "then", "to", "true", "union", "unique", "update", "user", "using", "values", "when",
    "where", "window", "with",
];

/// Validate an identifier before it is embedded in SQL.
///
/// # Errors
///
/// Returns `PortError::Config` for empty names, names containing NUL bytes and
/// names longer than the engines accept.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PortError::Config("Identifier cannot be empty".to_string()));
    }

    if name.contains('\0') {
        return Err(PortError::Config(format!(
            "Identifier contains a null byte: {:?}",
            name
        )));
    }

    if name.chars().count() > MAX_IDENTIFIER_LENGTH {
        return Err(PortError::Config(format!(
            "Identifier exceeds maximum length of {} characters: {:?}",
            MAX_IDENTIFIER_LENGTH, name
        )));
    }

    Ok(())
}

/// True if `name` is already a well-formed identifier quoted with `quote`.
pub fn is_quoted(name: &str, quote: char) -> bool {
    let Some(inner) = name
        .strip_prefix(quote)
        .and_then(|rest| rest.strip_suffix(quote))
    else {
        return false;
    };
    if name.len() < 2 {
        return false;
    }
    // Every inner quote must be doubled.
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == quote && chars.next() != Some(quote) {
            return false;
        }
    }
    true
}

/// Wrap `name` in `quote`, doubling inner quote characters.
///
/// Already-quoted input is returned as is.
pub fn quote_with(name: &str, quote: char) -> String {
    if is_quoted(name, quote) {
        return name.to_string();
    }
    let doubled: String = [quote, quote].iter().collect();
    format!("{q}{}{q}", name.replace(quote, &doubled), q = quote)
}

/// Strip one level of `quote` quoting, if present.
pub fn unquote(name: &str, quote: char) -> String {
    if is_quoted(name, quote) {
        let doubled: String = [quote, quote].iter().collect();
        let single = quote.to_string();
        name[1..name.len() - 1].replace(&doubled, &single)
    } else {
        name.to_string()
    }
}

/// True for words reserved by any supported engine.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_WORDS
        .binary_search(&name.to_lowercase().as_str())
        .is_ok()
}

/// True when `name` must be quoted to survive every engine unchanged.
///
/// Plain lowercase names made of ASCII letters, digits and underscores that do
/// not start with a digit and are not reserved can be emitted bare.
pub fn needs_quoting(name: &str) -> bool {
    let mut chars = name.chars();
    let plain_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let plain_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    !(plain_start && plain_rest) || is_reserved(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_words_sorted() {
        let mut sorted = RESERVED_WORDS.to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, RESERVED_WORDS);
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("a\0b").is_err());
        assert!(validate_identifier(&"x".repeat(65)).is_err());
        assert!(validate_identifier(&"x".repeat(64)).is_ok());
    }

    #[test]
    fn test_quote_with_escapes() {
        assert_eq!(quote_with("users", '"'), "\"users\"");
        assert_eq!(quote_with("table\"name", '"'), "\"table\"\"name\"");
        assert_eq!(quote_with("table`name", '`'), "`table``name`");
    }

    #[test]
    fn test_quote_with_is_idempotent() {
        for name in ["users", "order", "we\"ird", "Mixed Case"] {
            let once = quote_with(name, '"');
            assert_eq!(quote_with(&once, '"'), once);
        }
        let once = quote_with("a`b", '`');
        assert_eq!(quote_with(&once, '`'), once);
    }

    #[test]
    fn test_is_quoted_rejects_malformed() {
        assert!(is_quoted("\"ok\"", '"'));
        assert!(is_quoted("\"a\"\"b\"", '"'));
        assert!(!is_quoted("\"a\"b\"", '"'));
        assert!(!is_quoted("\"", '"'));
        assert!(!is_quoted("plain", '"'));
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"a\"\"b\"", '"'), "a\"b");
        assert_eq!(unquote("plain", '"'), "plain");
    }

    #[test]
    fn test_needs_quoting() {
        assert!(!needs_quoting("users"));
        assert!(!needs_quoting("tenant_id2"));
        assert!(needs_quoting("order"));
        assert!(needs_quoting("Users"));
        assert!(needs_quoting("2fa"));
        assert!(needs_quoting("has space"));
    }
}
