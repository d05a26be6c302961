//! SQL identifier validation
//!
//! Table and column names are interpolated into statement text, so every
//! name passes through [`Ident`] first. Format: lowercase snake case,
//! matching what the unquoted Postgres catalog would store.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{StoreError, StoreResult};

/// Postgres truncates identifiers past NAMEDATALEN - 1 bytes.
const MAX_IDENT_LEN: usize = 63;

static IDENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("invalid identifier regex"));

/// Validated SQL identifier, rendered double-quoted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    /// Validate an identifier.
    ///
    /// ```
    /// use adrater_store::Ident;
    ///
    /// assert!(Ident::new("personality_traits").is_ok());
    /// assert!(Ident::new("Ad").is_err()); // uppercase
    /// assert!(Ident::new("id; drop table ad").is_err());
    /// ```
    pub fn new(s: &str) -> StoreResult<Self> {
        if s.is_empty() {
            return Err(invalid(s, "identifier cannot be empty"));
        }
        if s.len() > MAX_IDENT_LEN {
            return Err(invalid(s, "identifier exceeds 63 characters"));
        }
        if !IDENT_RE.is_match(s) {
            return Err(invalid(
                s,
                "must be lowercase alphanumeric with underscores, not starting with a digit",
            ));
        }
        Ok(Self(s.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Quoted form for statement text.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

impl AsRef<str> for Ident {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Table name with an optional schema qualifier (`schema.table`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QualifiedName {
    schema: Option<Ident>,
    name: Ident,
}

impl QualifiedName {
    pub fn parse(s: &str) -> StoreResult<Self> {
        match s.split_once('.') {
            Some((schema, name)) => Ok(Self {
                schema: Some(Ident::new(schema)?),
                name: Ident::new(name)?,
            }),
            None => Ok(Self {
                schema: None,
                name: Ident::new(s)?,
            }),
        }
    }

    pub fn name(&self) -> &Ident {
        &self.name
    }

    pub fn schema(&self) -> Option<&Ident> {
        self.schema.as_ref()
    }

    /// Unquoted `schema.table` form, used in logs and error messages.
    pub fn plain(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema.as_str(), self.name.as_str()),
            None => self.name.as_str().to_owned(),
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{}.{}", schema, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

fn invalid(value: &str, reason: &'static str) -> StoreError {
    StoreError::InvalidIdentifier {
        value: value.to_owned(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_snake_case() {
        for name in ["ad", "category_assignment", "_private", "col2"] {
            assert!(Ident::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_injection_and_odd_names() {
        for name in [
            "",
            "2fast",
            "Ad",
            "ad\"",
            "id = 1 or 1=1",
            "name;--",
            "emoji_\u{1f600}",
        ] {
            assert!(Ident::new(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn rejects_overlong() {
        let long = "a".repeat(64);
        let err = Ident::new(&long).unwrap_err();
        assert!(err.to_string().contains("63"));
        assert!(Ident::new(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn renders_quoted() {
        let ident = Ident::new("copy").unwrap();
        assert_eq!(ident.to_string(), "\"copy\"");
        assert_eq!(ident.quoted(), "\"copy\"");
    }

    #[test]
    fn qualified_names() {
        let plain = QualifiedName::parse("rating").unwrap();
        assert_eq!(plain.to_string(), "\"rating\"");
        assert!(plain.schema().is_none());

        let qualified = QualifiedName::parse("app.rating").unwrap();
        assert_eq!(qualified.to_string(), "\"app\".\"rating\"");
        assert_eq!(qualified.plain(), "app.rating");

        assert!(QualifiedName::parse("a.b.c").is_err());
        assert!(QualifiedName::parse(".rating").is_err());
    }
}
