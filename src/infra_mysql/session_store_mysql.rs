use super::util::store_err;
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS refresh_session (
    id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
    principal VARCHAR(256) NOT NULL,
    secret_hash VARCHAR(255) NOT NULL,
    created_at DATETIME(6) NOT NULL,
    KEY idx_refresh_session_principal (principal, secret_hash)
)
"#;

// SQLSTATE of an InnoDB deadlock. The victim's transaction is rolled back whole.
const DEADLOCK: &str = "40001";

fn replace_err(op: &str, e: sqlx::Error) -> SessionStoreError {
    let deadlock = e
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == DEADLOCK);
    if deadlock {
        SessionStoreError::Conflict
    } else {
        store_err(op, e)
    }
}

pub struct MySqlSessionStore {
    pool: MySqlPool,
}

impl MySqlSessionStore {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlSessionStore { pool }
    }

    /// Create the table if it is missing. Run once at startup, never per request.
    pub async fn migrate(&self) -> Result<(), SessionStoreError> {
        sqlx::query(CREATE_TABLE)
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("migrate", e))?;
        Ok(())
    }

    fn row_to_record(principal: &Principal, row: MySqlRow) -> Result<SessionRecord, SessionStoreError> {
        let secret_hash: String = row
            .try_get("secret_hash")
            .map_err(|e| store_err("get", e))?;
        let created_at: DateTime<Utc> = row
            .try_get("created_at")
            .map_err(|e| store_err("get", e))?;
        Ok(SessionRecord {
            principal: principal.clone(),
            secret_hash: SecretHash(secret_hash),
            created_at,
        })
    }

    async fn replace_in_tx(
        &self,
        principal: &Principal,
        old_hash: &SecretHash,
        new_hash: &SecretHash,
        new_created_at: DateTime<Utc>,
    ) -> Result<(), SessionStoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err("replace.begin", e))?;

        // Row lock on the matched session; a racing transaction sees zero rows once we commit.
        let deleted = sqlx::query(
            r#"
DELETE FROM refresh_session
WHERE principal = ? AND secret_hash = ?
"#,
        )
        .bind(principal.as_str())
        .bind(old_hash.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| replace_err("replace.delete", e))?
        .rows_affected();

        if deleted == 0 {
            tx.rollback()
                .await
                .map_err(|e| store_err("replace.rollback", e))?;
            return Err(SessionStoreError::Conflict);
        }

        sqlx::query(
            r#"
INSERT INTO refresh_session (principal, secret_hash, created_at)
VALUES (?, ?, ?)
"#,
        )
        .bind(principal.as_str())
        .bind(new_hash.as_str())
        .bind(new_created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| replace_err("replace.insert", e))?;

        tx.commit()
            .await
            .map_err(|e| store_err("replace.commit", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for MySqlSessionStore {
    async fn put(
        &self,
        principal: &Principal,
        secret_hash: &SecretHash,
        created_at: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        let query = sqlx::query(
            r#"
INSERT INTO refresh_session (principal, secret_hash, created_at)
VALUES (?, ?, ?)
"#,
        )
        .bind(principal.as_str())
        .bind(secret_hash.as_str())
        .bind(created_at);

        deadline
            .bound(query.execute(&self.pool))
            .await?
            .map_err(|e| store_err("put", e))?;
        Ok(())
    }

    async fn get(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<SessionRecord, SessionStoreError> {
        let query = sqlx::query(
            r#"
SELECT secret_hash, created_at
FROM refresh_session
WHERE principal = ?
ORDER BY created_at DESC
LIMIT 1
"#,
        )
        .bind(principal.as_str());

        let row_opt: Option<MySqlRow> = deadline
            .bound(query.fetch_optional(&self.pool))
            .await?
            .map_err(|e| store_err("get", e))?;

        match row_opt {
            Some(row) => Self::row_to_record(principal, row),
            None => Err(SessionStoreError::NotFound),
        }
    }

    async fn replace_atomically(
        &self,
        principal: &Principal,
        old_hash: &SecretHash,
        new_hash: &SecretHash,
        new_created_at: DateTime<Utc>,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        // Dropping the transaction on timeout rolls it back.
        deadline
            .bound(self.replace_in_tx(principal, old_hash, new_hash, new_created_at))
            .await?
    }

    async fn delete(
        &self,
        principal: &Principal,
        secret_hash: &SecretHash,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        let query = sqlx::query(
            r#"
DELETE FROM refresh_session
WHERE principal = ? AND secret_hash = ?
"#,
        )
        .bind(principal.as_str())
        .bind(secret_hash.as_str());

        deadline
            .bound(query.execute(&self.pool))
            .await?
            .map_err(|e| store_err("delete", e))?;
        Ok(())
    }

    async fn delete_by_principal(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<(), SessionStoreError> {
        let query = sqlx::query(
            r#"
DELETE FROM refresh_session
WHERE principal = ?
"#,
        )
        .bind(principal.as_str());

        deadline
            .bound(query.execute(&self.pool))
            .await?
            .map_err(|e| store_err("delete_by_principal", e))?;
        Ok(())
    }

    async fn count_by_principal(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<u64, SessionStoreError> {
        let query = sqlx::query_scalar::<_, i64>(
            r#"
SELECT COUNT(*)
FROM refresh_session
WHERE principal = ?
"#,
        )
        .bind(principal.as_str());

        let count = deadline
            .bound(query.fetch_one(&self.pool))
            .await?
            .map_err(|e| store_err("count_by_principal", e))?;
        Ok(count.max(0) as u64)
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

    #[test]
    fn non_deadlock_errors_stay_store_errors() {
        assert!(matches!(
            replace_err("replace.delete", sqlx::Error::RowNotFound),
            SessionStoreError::Store(msg) if msg.starts_with("mysql replace.delete")
        ));
    }

    // A fresh principal per test keeps runs independent on a shared database.
    async fn connect() -> (MySqlSessionStore, Principal) {
        let dsn = std::env::var("MYSQL_TEST_DSN")
            .unwrap_or_else(|_| "mysql://root@127.0.0.1:3306/tokenkeeper_test".to_string());
        let store = MySqlSessionStore::new(MySqlPool::connect(&dsn).await.unwrap());
        store.migrate().await.unwrap();
        let principal = Principal::new(format!("alice-{}", uuid::Uuid::new_v4())).unwrap();
        (store, principal)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore = "needs a mysql server at MYSQL_TEST_DSN"]
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
    #[ignore = "needs a mysql server at MYSQL_TEST_DSN"]
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
