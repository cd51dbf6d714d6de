use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_PRINCIPAL_LEN: usize = 256;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PrincipalError {
    #[error("principal is empty")]
    Empty,
    #[error("principal exceeds {MAX_PRINCIPAL_LEN} bytes")]
    TooLong,
}

/// The string identity a session belongs to.
///
/// The value is trusted as supplied by the transport layer; only its shape is checked.
#[derive(Debug, Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Result<Self, PrincipalError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PrincipalError::Empty);
        }
        if name.len() > MAX_PRINCIPAL_LEN {
            return Err(PrincipalError::TooLong);
        }
        Ok(Principal(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Principal {
    type Error = PrincipalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Principal::new(value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        let p = Principal::new("alice").unwrap();
        assert_eq!(p.as_str(), "alice");
        assert_eq!(p.to_string(), "alice");
    }

    #[test]
    fn rejects_blank_names() {
        assert_eq!(Principal::new(""), Err(PrincipalError::Empty));
        assert_eq!(Principal::new("   "), Err(PrincipalError::Empty));
    }

    #[test]
    fn rejects_oversized_names() {
        let long = "a".repeat(MAX_PRINCIPAL_LEN + 1);
        assert_eq!(Principal::new(long), Err(PrincipalError::TooLong));
        assert!(Principal::new("a".repeat(MAX_PRINCIPAL_LEN)).is_ok());
    }

    #[test]
    fn deserialize_validates() {
        let ok: Principal = serde_json::from_str("\"bob\"").unwrap();
        assert_eq!(ok.as_str(), "bob");
        assert!(serde_json::from_str::<Principal>("\"\"").is_err());
    }
}
