use super::Principal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// One-way hash of a refresh secret, PHC encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretHash(pub String);

impl SecretHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Clear-text refresh secret. Exists only for the duration of the call that issued it.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RefreshSecret(pub String);

impl RefreshSecret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RefreshSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshSecret(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct AccessToken(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub principal: Principal,
    pub secret_hash: SecretHash,
    pub created_at: DateTime<Utc>,
}
