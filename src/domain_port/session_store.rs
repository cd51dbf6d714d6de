use crate::domain_model::*;
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session not found")]
    NotFound,
    #[error("session was replaced concurrently")]
    Conflict,
    #[error(transparent)]
    DeadlineExceeded(#[from] DeadlineExceeded),
    #[error("store error: {0}")]
    Store(String),
}

/// Persistent refresh sessions keyed by principal.
///
/// The store is a plain keyed primitive. Keeping a single session per principal is
/// the caller's job; `put` never evicts.
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn put(
        &self,
        principal: &Principal,
        secret_hash: &SecretHash,
        created_at: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError>;

    /// Newest record for the principal.
    async fn get(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<SessionRecord, SessionStoreError>;

    /// Swap `old_hash` for `new_hash` as one conditional operation.
    /// Fails with `Conflict` when no record with `old_hash` exists any more.
    async fn replace_atomically(
        &self,
        principal: &Principal,
        old_hash: &SecretHash,
        new_hash: &SecretHash,
        new_created_at: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError>;

    async fn delete(
        &self,
        principal: &Principal,
        secret_hash: &SecretHash,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError>;

    async fn delete_by_principal(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError>;

    async fn count_by_principal(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<u64, SessionStoreError>;
}
