use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;

const SESSION_REPLACE: &str = include_str!("session_replace.lua");

/// Sessions as one redis hash per principal: field = secret hash, value = created_at millis.
pub struct RedisSessionStore {
    conn: ConnectionManager,
    prefix: String,
    replace_script: Script,
}

impl RedisSessionStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        RedisSessionStore {
            conn,
            prefix: prefix.into(),
            replace_script: Script::new(SESSION_REPLACE),
        }
    }

    fn key(&self, principal: &Principal) -> String {
        format!("{}:{}", self.prefix, principal)
    }
}

fn store_err(op: &str, e: redis::RedisError) -> SessionStoreError {
    SessionStoreError::Store(format!("redis {}: {}", op, e))
}

fn newest(principal: &Principal, fields: HashMap<String, i64>) -> Option<SessionRecord> {
    fields
        .into_iter()
        .filter_map(|(hash, millis)| {
            DateTime::<Utc>::from_timestamp_millis(millis).map(|created_at| (hash, created_at))
        })
        .max_by_key(|(_, created_at)| *created_at)
        .map(|(hash, created_at)| SessionRecord {
            principal: principal.clone(),
            secret_hash: SecretHash(hash),
            created_at,
        })
}

#[async_trait::async_trait]
impl SessionStore for RedisSessionStore {
    async fn put(
        &self,
        principal: &Principal,
        secret_hash: &SecretHash,
        created_at: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        let key = self.key(principal);
        let mut conn = self.conn.clone();
        let _: () = deadline
            .bound(conn.hset(&key, secret_hash.as_str(), created_at.timestamp_millis()))
            .await?
            .map_err(|e| store_err("put", e))?;
        Ok(())
    }

    async fn get(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<SessionRecord, SessionStoreError> {
        let key = self.key(principal);
        let mut conn = self.conn.clone();
        let fields: HashMap<String, i64> = deadline
            .bound(conn.hgetall(&key))
            .await?
            .map_err(|e| store_err("get", e))?;
        newest(principal, fields).ok_or(SessionStoreError::NotFound)
    }

    async fn replace_atomically(
        &self,
        principal: &Principal,
        old_hash: &SecretHash,
        new_hash: &SecretHash,
        new_created_at: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        let key = self.key(principal);
        let mut conn = self.conn.clone();
        let mut invocation = self.replace_script.key(&key);
        invocation
            .arg(old_hash.as_str())
            .arg(new_hash.as_str())
            .arg(new_created_at.timestamp_millis());
        let swapped: i64 = deadline
            .bound(invocation.invoke_async(&mut conn))
            .await?
            .map_err(|e| store_err("replace", e))?;

        match swapped {
            1 => Ok(()),
            _ => Err(SessionStoreError::Conflict),
        }
    }

    async fn delete(
        &self,
        principal: &Principal,
        secret_hash: &SecretHash,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        let key = self.key(principal);
        let mut conn = self.conn.clone();
        let _: i64 = deadline
            .bound(conn.hdel(&key, secret_hash.as_str()))
            .await?
            .map_err(|e| store_err("delete", e))?;
        Ok(())
    }

    async fn delete_by_principal(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        let key = self.key(principal);
        let mut conn = self.conn.clone();
        let _: i64 = deadline
            .bound(conn.del(&key))
            .await?
            .map_err(|e| store_err("delete_by_principal", e))?;
        Ok(())
    }

    async fn count_by_principal(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<u64, SessionStoreError> {
        let key = self.key(principal);
        let mut conn = self.conn.clone();
        let count: u64 = deadline
            .bound(conn.hlen(&key))
            .await?
            .map_err(|e| store_err("count_by_principal", e))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use futures_util::future::join_all;
    use std::sync::Arc;

    fn hash(s: &str) -> SecretHash {
        SecretHash(s.to_string())
    }

    // A fresh key prefix per test keeps runs independent on a shared server.
    async fn connect() -> (RedisSessionStore, Principal) {
        let dsn = std::env::var("REDIS_TEST_DSN")
            .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let conn = redis::Client::open(dsn)
            .unwrap()
            .get_connection_manager()
            .await
            .unwrap();
        let prefix = format!("refresh-test-{}", uuid::Uuid::new_v4());
        (RedisSessionStore::new(conn, prefix), Principal::new("alice").unwrap())
    }

    #[test]
    fn newest_picks_latest_created_at() {
        let alice = Principal::new("alice").unwrap();
        let mut fields = HashMap::new();
        fields.insert("old".to_string(), 1_700_000_000_000);
        fields.insert("new".to_string(), 1_700_000_060_000);
        let record = newest(&alice, fields).unwrap();
        assert_eq!(record.secret_hash, SecretHash("new".into()));
        assert_eq!(record.created_at.timestamp(), 1_700_000_060);
    }

    #[test]
    fn newest_of_nothing_is_none() {
        let alice = Principal::new("alice").unwrap();
        assert!(newest(&alice, HashMap::new()).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "needs a redis server at REDIS_TEST_DSN"]
    async fn racing_replacements_have_one_winner() {
        let (store, principal) = connect().await;
        let store = Arc::new(store);
        store
            .put(&principal, &hash("h0"), Utc::now(), Deadline::none())
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                let principal = principal.clone();
                tokio::spawn(async move {
                    store
                        .replace_atomically(
                            &principal,
                            &hash("h0"),
                            &hash(&format!("h{}", i + 1)),
                            Utc::now(),
                            Deadline::none(),
                        )
                        .await
                        .map(|()| i + 1)
                })
            })
            .collect();

        let mut winners = Vec::new();
        for result in join_all(handles).await {
            match result.unwrap() {
                Ok(i) => winners.push(i),
                Err(e) => assert_eq!(e, SessionStoreError::Conflict),
            }
        }
        assert_eq!(winners.len(), 1);

        let record = store.get(&principal, Deadline::none()).await.unwrap();
        assert_eq!(record.secret_hash, hash(&format!("h{}", winners[0])));
        assert_eq!(
            store.count_by_principal(&principal, Deadline::none()).await,
            Ok(1)
        );

        store
            .delete_by_principal(&principal, Deadline::none())
            .await
            .unwrap();
    }

    #[tokio::test]
    #[ignore = "needs a redis server at REDIS_TEST_DSN"]
    async fn lifecycle_against_live_store() {
        let (store, principal) = connect().await;
        assert_eq!(
            store.get(&principal, Deadline::none()).await,
            Err(SessionStoreError::NotFound)
        );
        assert_eq!(
            store
                .replace_atomically(&principal, &hash("h1"), &hash("h2"), Utc::now(), Deadline::none())
                .await,
            Err(SessionStoreError::Conflict)
        );

        let now = Utc::now();
        store
            .put(&principal, &hash("h1"), now - Duration::minutes(5), Deadline::none())
            .await
            .unwrap();
        store
            .put(&principal, &hash("h2"), now, Deadline::none())
            .await
            .unwrap();
        assert_eq!(
            store.count_by_principal(&principal, Deadline::none()).await,
            Ok(2)
        );
        assert_eq!(
            store.get(&principal, Deadline::none()).await.unwrap().secret_hash,
            hash("h2")
        );

        store
            .delete(&principal, &hash("h2"), Deadline::none())
            .await
            .unwrap();
        assert_eq!(
            store.get(&principal, Deadline::none()).await.unwrap().secret_hash,
            hash("h1")
        );

        store
            .delete_by_principal(&principal, Deadline::none())
            .await
            .unwrap();
        assert_eq!(
            store.count_by_principal(&principal, Deadline::none()).await,
            Ok(0)
        );
    }
}
