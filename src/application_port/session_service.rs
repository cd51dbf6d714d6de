use crate::domain_model::*;
use crate::domain_port::SessionStoreError;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("config error: {0}")]
    Config(String),
    #[error("entropy error: {0}")]
    Entropy(String),
    #[error("signing error: {0}")]
    Signing(String),
    #[error("hashing error: {0}")]
    Hashing(String),
    #[error("invalid session")]
    InvalidSession,
    #[error("invalid credential")]
    InvalidCredential,
    #[error("session expired")]
    SessionExpired,
    #[error("storage error: {0}")]
    Storage(String),
}

impl SessionError {
    /// Failures that require the caller to authenticate again.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidSession
                | SessionError::InvalidCredential
                | SessionError::SessionExpired
        )
    }

    /// Wrap a store failure with the name of the operation that produced it.
    pub fn storage(op: &str, err: SessionStoreError) -> Self {
        SessionError::Storage(format!("{}: {}", op, err))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionTokens {
    pub access_token: AccessToken,
    pub refresh_token: RefreshSecret,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl SessionPolicy {
    /// Build a policy from configured seconds. Both lifetimes must be positive and
    /// `now + ttl` must stay inside the representable date range.
    pub fn from_secs(access_ttl_secs: u64, refresh_ttl_secs: u64) -> Result<Self, SessionError> {
        let policy = SessionPolicy {
            access_ttl: ttl_from_secs("access", access_ttl_secs)?,
            refresh_ttl: ttl_from_secs("refresh", refresh_ttl_secs)?,
        };
        Ok(policy)
    }
}

fn ttl_from_secs(name: &str, secs: u64) -> Result<Duration, SessionError> {
    let ttl = i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .filter(|ttl| *ttl > Duration::zero())
        .ok_or_else(|| SessionError::Config(format!("{} ttl out of range: {}s", name, secs)))?;
    expires_at(Utc::now(), ttl)?;
    Ok(ttl)
}

/// `from + ttl`, or a config error when the sum leaves chrono's range.
pub fn expires_at(from: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, SessionError> {
    from.checked_add_signed(ttl)
        .ok_or_else(|| SessionError::Config(format!("ttl of {}s overflows", ttl.num_seconds())))
}

#[async_trait::async_trait]
pub trait CredentialGenerator: Send + Sync {
    async fn new_access_token(
        &self,
        principal: &Principal,
        ttl: Duration,
    ) -> Result<(AccessToken, DateTime<Utc>), SessionError>;

    async fn new_refresh_secret(&self) -> Result<RefreshSecret, SessionError>;

    /// Check signature, expiry, issuer and audience; returns the subject.
    async fn verify_access_token(&self, token: &AccessToken) -> Result<Principal, SessionError>;
}

#[async_trait::async_trait]
pub trait SecretHasher: Send + Sync {
    async fn hash(&self, secret: &RefreshSecret) -> Result<SecretHash, SessionError>;
    /// Mismatch and malformed hashes are both `false`, never an error.
    async fn verify(&self, provided: &str, stored: &SecretHash) -> bool;
}

#[async_trait::async_trait]
pub trait SessionService: Send + Sync {
    /// Login: evict any existing session and open a fresh one.
    async fn issue(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<SessionTokens, SessionError>;

    /// Exchange a refresh secret for a new pair. The presented secret is dead afterwards.
    async fn refresh(
        &self,
        principal: &Principal,
        provided_secret: &str,
        deadline: Deadline,
    ) -> Result<SessionTokens, SessionError>;

    /// Forced logout.
    async fn revoke(&self, principal: &Principal, deadline: Deadline)
    -> Result<(), SessionError>;

    async fn authenticate(&self, access_token: &str) -> Result<Principal, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_from_configured_seconds() {
        let policy = SessionPolicy::from_secs(900, 2_592_000).unwrap();
        assert_eq!(policy.access_ttl, Duration::minutes(15));
        assert_eq!(policy.refresh_ttl, Duration::days(30));
    }

    #[test]
    fn policy_rejects_zero_and_unrepresentable_ttls() {
        for (access, refresh) in [
            (0, 60),
            (60, 0),
            (60, u64::MAX),
            (60, i64::MAX as u64),
            (60, 10_000_000_000_000),
        ] {
            let err = SessionPolicy::from_secs(access, refresh).unwrap_err();
            assert!(matches!(err, SessionError::Config(_)), "{access}/{refresh}");
        }
    }

    #[test]
    fn expires_at_reports_overflow() {
        let now = Utc::now();
        assert_eq!(expires_at(now, Duration::hours(1)).unwrap(), now + Duration::hours(1));
        assert!(expires_at(DateTime::<Utc>::MAX_UTC, Duration::seconds(1)).is_err());
    }
}
