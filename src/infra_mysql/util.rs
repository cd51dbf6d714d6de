use crate::domain_port::SessionStoreError;

pub fn store_err(op: &str, e: sqlx::Error) -> SessionStoreError {
    SessionStoreError::Store(format!("mysql {}: {}", op, e))
}
