//! Partial-update fragment parsing and placeholder matching.
//!
//! A fragment is the `SET` list of a conditional update, as text:
//!
//! ```text
//! mobile=REF(p1), age=30, email = REF(p2)
//! ```
//!
//! Expressions never contain commas. Segments without `=` are ignored rather
//! than failing the statement.

use std::{collections::HashMap, sync::LazyLock};

use regex::Regex;
use rowseal_common::FieldSecurityError;
use thiserror::Error;

/// Default placeholder shape: `REF(<binding>)`.
pub const DEFAULT_PLACEHOLDER: &str = r"^REF\((\w+)\)$";

/// Placeholder shape generated by MyBatis-Plus update wrappers.
pub const MYBATIS_PLUS_PLACEHOLDER: &str = r"^#\{ew\.paramNameValuePairs\.(MPGENVAL\d+)\}$";

static DEFAULT_PLACEHOLDER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(DEFAULT_PLACEHOLDER).expect("default placeholder pattern compiles"));

static MYBATIS_PLUS_PLACEHOLDER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(MYBATIS_PLUS_PLACEHOLDER).expect("mybatis-plus placeholder pattern compiles")
});

/// Parse `fragment` into `column -> expression`. Later assignments to the same
/// column win.
pub fn parse(fragment: &str) -> HashMap<String, String> {
    fragment
        .split(',')
        .filter_map(|segment| {
            let (column, expression) = segment.split_once('=')?;
            let column = unquote(column.trim());
            let expression = expression.trim();
            if column.is_empty() || expression.is_empty() {
                return None;
            }
            Some((column.to_owned(), expression.to_owned()))
        })
        .collect()
}

fn unquote(column: &str) -> &str {
    column
        .strip_prefix('`')
        .and_then(|c| c.strip_suffix('`'))
        .or_else(|| column.strip_prefix('"').and_then(|c| c.strip_suffix('"')))
        .unwrap_or(column)
}

/// Recognises placeholder expressions and extracts their binding key.
#[derive(Debug, Clone)]
pub struct PlaceholderPattern(Regex);

impl PlaceholderPattern {
    /// Compile `pattern`. It must contain exactly one capture group, which
    /// yields the binding key.
    ///
    /// # Errors
    ///
    /// Returns [`FieldSecurityError::Configuration`] if the pattern does not
    /// compile or has the wrong number of capture groups.
    pub fn new(pattern: &str) -> Result<Self, FieldSecurityError> {
        let re = Regex::new(pattern).map_err(|e| {
            FieldSecurityError::configuration(format!("invalid placeholder pattern: {e}"))
        })?;
        if re.captures_len() != 2 {
            return Err(FieldSecurityError::configuration(format!(
                "placeholder pattern must have exactly one capture group, found {}",
                re.captures_len() - 1
            )));
        }
        Ok(Self(re))
    }

    /// Pattern matching MyBatis-Plus `#{ew.paramNameValuePairs.MPGENVALn}` placeholders.
    pub fn mybatis_plus() -> Self {
        Self(MYBATIS_PLUS_PLACEHOLDER_REGEX.clone())
    }

    /// Binding key named by `expression`, or `None` for a literal.
    pub fn binding_key<'e>(&self, expression: &'e str) -> Option<&'e str> {
        self.0
            .captures(expression.trim())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for PlaceholderPattern {
    fn default() -> Self {
        Self(DEFAULT_PLACEHOLDER_REGEX.clone())
    }
}

/// A condition-write assignment the pipeline cannot rewrite. Logged and
/// skipped; never fatal.
///
/// Messages name columns and binding keys only, never expressions, which may
/// embed plaintext literals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UnsupportedShape {
    #[error("column `{column}` is assigned a literal expression")]
    Literal { column: String },

    #[error("column `{column}` references binding `{binding}` which is absent from the binding map")]
    UnboundPlaceholder { column: String, binding: String },

    #[error("{what} for table `{table}` needs placeholder-bound columns [{}]", .columns.join(","))]
    PartialAssignment {
        what: &'static str,
        table: String,
        columns: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_and_trims() {
        let m = parse("mobile=REF(p1), age=30 ,  email = REF(p2)");
        assert_eq!(m.len(), 3);
        assert_eq!(m["mobile"], "REF(p1)");
        assert_eq!(m["age"], "30");
        assert_eq!(m["email"], "REF(p2)");
    }

    #[test]
    fn tolerates_garbage_segments() {
        let m = parse("mobile=REF(p1),,oops, =x, y=");
        assert_eq!(m.len(), 1);
        assert!(m.contains_key("mobile"));
        assert!(parse("").is_empty());
    }

    #[test]
    fn strips_identifier_quotes() {
        let m = parse("`mobile`=REF(p1), \"email\"=REF(p2)");
        assert!(m.contains_key("mobile"));
        assert!(m.contains_key("email"));
    }

    #[test]
    fn expression_keeps_everything_after_first_equals() {
        let m = parse("note=a=b");
        assert_eq!(m["note"], "a=b");
    }

    #[test]
    fn default_pattern_extracts_key() {
        let p = PlaceholderPattern::default();
        assert_eq!(p.binding_key("REF(p1)"), Some("p1"));
        assert_eq!(p.binding_key(" REF(p_2) "), Some("p_2"));
        assert_eq!(p.binding_key("30"), None);
        assert_eq!(p.binding_key("'REF(p1)'"), None);
    }

    #[test]
    fn mybatis_plus_pattern() {
        let p = PlaceholderPattern::mybatis_plus();
        assert_eq!(
            p.binding_key("#{ew.paramNameValuePairs.MPGENVAL1}"),
            Some("MPGENVAL1")
        );
        assert_eq!(p.binding_key("#{et.mobile}"), None);
    }

    #[test]
    fn builtin_patterns_pass_validation() {
        for pattern in [DEFAULT_PLACEHOLDER, MYBATIS_PLUS_PLACEHOLDER] {
            assert!(PlaceholderPattern::new(pattern).is_ok(), "{pattern}");
        }
        assert_eq!(PlaceholderPattern::default().as_str(), DEFAULT_PLACEHOLDER);
        assert_eq!(PlaceholderPattern::mybatis_plus().as_str(), MYBATIS_PLUS_PLACEHOLDER);
    }

    #[test]
    fn custom_pattern_needs_one_group() {
        assert!(PlaceholderPattern::new(r"^:(\w+)$").is_ok());
        assert!(PlaceholderPattern::new(r"^:\w+$").is_err());
        assert!(PlaceholderPattern::new(r"^(:)(\w+)$").is_err());
        assert!(PlaceholderPattern::new(r"^(").is_err());
    }

    #[test]
    fn unsupported_shape_never_echoes_expression() {
        let msg = UnsupportedShape::Literal {
            column: "mobile".into(),
        }
        .to_string();
        assert!(msg.contains("mobile"));
        assert!(!msg.contains("1380"));
    }
}
