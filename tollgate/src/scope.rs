//! OAuth2 scope tokens and scope requirements

use std::{fmt, str::FromStr};

use aliri_braid::braid;
use thiserror::Error;

/// An invalid scope token
#[derive(Debug, Error)]
pub enum InvalidScopeToken {
    /// The scope token was the empty string
    #[error("scope token cannot be empty")]
    EmptyString,
    /// The scope token contained an invalid byte
    #[error("invalid scope token byte at position {position}: 0x{value:02x}")]
    InvalidByte {
        /// The index in the scope token where the invalid byte was found
        position: usize,
        /// The invalid byte value
        value: u8,
    },
}

impl From<std::convert::Infallible> for InvalidScopeToken {
    fn from(never: std::convert::Infallible) -> Self {
        match never {}
    }
}

/// An OAuth2 scope token as defined in [RFC 6749, Section 3.3][RFC6749 3.3]
///
/// A scope token must be composed of printable ASCII characters excluding
/// ` ` (space), `"` (double quote), and `\` (backslash).
///
///   [RFC6749 3.3]: (https://datatracker.ietf.org/doc/html/rfc6749#section-3.3)
#[braid(
    serde,
    validator,
    ref_doc = "A borrowed reference to an OAuth2 [`ScopeToken`]"
)]
pub struct ScopeToken;

impl aliri_braid::Validator for ScopeToken {
    type Error = InvalidScopeToken;

    fn validate(s: &str) -> Result<(), Self::Error> {
        if s.is_empty() {
            Err(InvalidScopeToken::EmptyString)
        } else if let Some((position, &value)) = s
            .as_bytes()
            .iter()
            .enumerate()
            .find(|(_, &b)| b <= 0x20 || b == 0x22 || b == 0x5C || 0x7F <= b)
        {
            Err(InvalidScopeToken::InvalidByte { position, value })
        } else {
            Ok(())
        }
    }
}

/// Indicates the requester held insufficient scope to be granted access
/// to a controlled resource
///
/// Every required scope that was not granted is listed, in the order in
/// which the requirement named them.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("insufficient scope; missing: {}", DisplayList(.missing))]
pub struct InsufficientScope {
    /// The scopes that were required but not granted
    pub missing: Vec<ScopeToken>,
}

struct DisplayList<'a>(&'a [ScopeToken]);

impl fmt::Display for DisplayList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for scope in self.0 {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(scope.as_str())?;
            first = false;
        }
        Ok(())
    }
}

/// A set of scopes, all of which must be granted to a token
///
/// An empty requirement allows any token.
///
/// ```
/// use aliri_traits::Policy;
/// use tollgate::{RequiredScopes, ScopeToken};
///
/// let required: RequiredScopes = "read write".parse().unwrap();
///
/// let granted = vec!["read".to_string()];
/// let denial = required.evaluate(&granted).unwrap_err();
/// assert_eq!(denial.missing, vec![ScopeToken::from_static("write")]);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[must_use]
pub struct RequiredScopes(Vec<ScopeToken>);

impl RequiredScopes {
    /// A requirement that is satisfied by any token
    #[inline]
    pub const fn none() -> Self {
        Self(Vec::new())
    }

    /// Adds a scope to the requirement
    ///
    /// Duplicate scopes are ignored.
    pub fn and(mut self, scope: ScopeToken) -> Self {
        self.insert(scope);
        self
    }

    /// Adds a scope to the requirement
    pub fn insert(&mut self, scope: ScopeToken) {
        if !self.0.contains(&scope) {
            self.0.push(scope);
        }
    }

    /// Whether any scope is required
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The required scopes
    pub fn iter(&self) -> impl Iterator<Item = &ScopeTokenRef> {
        self.0.iter().map(AsRef::as_ref)
    }

    /// The required scopes that do not appear in `granted`
    pub fn missing_from<S: AsRef<str>>(&self, granted: &[S]) -> Vec<ScopeToken> {
        self.0
            .iter()
            .filter(|req| !granted.iter().any(|g| g.as_ref() == req.as_str()))
            .cloned()
            .collect()
    }
}

impl aliri_traits::Policy for RequiredScopes {
    type Request = Vec<String>;
    type Denial = InsufficientScope;

    fn evaluate(&self, granted: &Self::Request) -> Result<(), Self::Denial> {
        let missing = self.missing_from(granted);

        if missing.is_empty() {
            Ok(())
        } else {
            Err(InsufficientScope { missing })
        }
    }
}

impl FromStr for RequiredScopes {
    type Err = InvalidScopeToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split_whitespace()
            .map(|s| ScopeToken::new(s.to_owned()))
            .collect()
    }
}

impl FromIterator<ScopeToken> for RequiredScopes {
    fn from_iter<I: IntoIterator<Item = ScopeToken>>(iter: I) -> Self {
        let mut required = Self::none();
        for scope in iter {
            required.insert(scope);
        }
        required
    }
}

impl fmt::Display for RequiredScopes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DisplayList(&self.0).fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use aliri_traits::Policy;

    use super::*;

    fn granted(scopes: &[&str]) -> Vec<String> {
        scopes.iter().map(|s| (*s).to_owned()).collect()
    }

    #[test]
    fn scope_token_handles_valid() {
        let x = ScopeToken::new("https://crates.io/scopes/publish:crate".to_owned()).unwrap();
        assert_eq!(x.as_str(), "https://crates.io/scopes/publish:crate");
    }

    #[test]
    fn scope_token_rejects_empty() {
        let x = ScopeToken::new(String::new());
        assert!(matches!(x, Err(InvalidScopeToken::EmptyString)));
    }

    #[test]
    fn scope_token_rejects_space_quote_and_backslash() {
        for bad in ["read write", "\"read\"", "read\\write", "read\x7F"] {
            let x = ScopeToken::new(bad.to_owned());
            assert!(
                matches!(x, Err(InvalidScopeToken::InvalidByte { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn empty_requirement_allows_anything() {
        assert!(RequiredScopes::none().evaluate(&Vec::new()).is_ok());
    }

    #[test]
    fn reports_every_missing_scope() {
        let required: RequiredScopes = "read write admin".parse().unwrap();

        let denial = required.evaluate(&granted(&["read"])).unwrap_err();

        assert_eq!(
            denial.missing,
            vec![
                ScopeToken::from_static("write"),
                ScopeToken::from_static("admin")
            ]
        );
        assert_eq!(denial.to_string(), "insufficient scope; missing: write admin");
    }

    #[test]
    fn superset_of_requirement_is_allowed() {
        let required: RequiredScopes = "read write".parse().unwrap();

        assert!(required
            .evaluate(&granted(&["write", "admin", "read"]))
            .is_ok());
    }

    #[test]
    fn duplicate_requirements_are_collapsed() {
        let required: RequiredScopes = "read read write".parse().unwrap();
        assert_eq!(required.to_string(), "read write");
    }
}
