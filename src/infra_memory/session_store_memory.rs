use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[derive(Debug, Clone)]
struct StoredSession {
    secret_hash: SecretHash,
    created_at: DateTime<Utc>,
}

/// In-process session store.
///
/// Per-principal mutations run under the shard lock, which is what makes
/// `replace_atomically` a single unit here.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<Principal, Vec<StoredSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        MemorySessionStore {
            sessions: DashMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn put(
        &self,
        principal: &Principal,
        secret_hash: &SecretHash,
        created_at: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        deadline
            .bound(async {
                self.sessions
                    .entry(principal.clone())
                    .or_default()
                    .push(StoredSession {
                        secret_hash: secret_hash.clone(),
                        created_at,
                    });
            })
            .await?;
        Ok(())
    }

    async fn get(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<SessionRecord, SessionStoreError> {
        let newest = deadline
            .bound(async {
                self.sessions.get(principal).and_then(|sessions| {
                    sessions.iter().max_by_key(|s| s.created_at).cloned()
                })
            })
            .await?;

        newest
            .map(|s| SessionRecord {
                principal: principal.clone(),
                secret_hash: s.secret_hash,
                created_at: s.created_at,
            })
            .ok_or(SessionStoreError::NotFound)
    }

    async fn replace_atomically(
        &self,
        principal: &Principal,
        old_hash: &SecretHash,
        new_hash: &SecretHash,
        new_created_at: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        deadline
            .bound(async {
                let mut sessions = self
                    .sessions
                    .get_mut(principal)
                    .ok_or(SessionStoreError::Conflict)?;
                let pos = sessions
                    .iter()
                    .position(|s| &s.secret_hash == old_hash)
                    .ok_or(SessionStoreError::Conflict)?;
                sessions.remove(pos);
                sessions.push(StoredSession {
                    secret_hash: new_hash.clone(),
                    created_at: new_created_at,
                });
                Ok::<(), SessionStoreError>(())
            })
            .await?
    }

    async fn delete(
        &self,
        principal: &Principal,
        secret_hash: &SecretHash,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        deadline
            .bound(async {
                if let Some(mut sessions) = self.sessions.get_mut(principal) {
                    sessions.retain(|s| &s.secret_hash != secret_hash);
                }
                self.sessions.remove_if(principal, |_, sessions| sessions.is_empty());
            })
            .await?;
        Ok(())
    }

    async fn delete_by_principal(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        deadline
            .bound(async {
                self.sessions.remove(principal);
            })
            .await?;
        Ok(())
    }

    async fn count_by_principal(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<u64, SessionStoreError> {
        let count = deadline
            .bound(async {
                self.sessions
                    .get(principal)
                    .map_or(0, |sessions| sessions.len() as u64)
            })
            .await?;
        Ok(count)
    }
}
