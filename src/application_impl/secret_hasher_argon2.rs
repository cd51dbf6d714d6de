use crate::application_port::*;
use crate::domain_model::*;
use crate::logger::*;
use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};

#[derive(Debug, Clone, Copy)]
pub struct HasherParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HasherParams {
    fn default() -> Self {
        HasherParams {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// argon2id over refresh secrets. Work happens on the blocking pool.
#[derive(Clone)]
pub struct Argon2SecretHasher {
    argon2: Argon2<'static>,
}

impl Argon2SecretHasher {
    pub fn new(params: HasherParams) -> Result<Self, SessionError> {
        let params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            None,
        )
        .map_err(|e| SessionError::Config(format!("argon2 params: {}", e)))?;
        Ok(Argon2SecretHasher {
            argon2: Argon2::new(Algorithm::Argon2id, Version::V0x13, params),
        })
    }
}

#[async_trait::async_trait]
impl SecretHasher for Argon2SecretHasher {
    async fn hash(&self, secret: &RefreshSecret) -> Result<SecretHash, SessionError> {
        let argon2 = self.argon2.clone();
        let secret = secret.expose().to_owned();
        let hash = tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(secret.as_bytes(), &salt)
                .map(|h| h.to_string())
        })
        .await
        .map_err(|e| SessionError::Hashing(format!("hasher.hash: {}", e)))?
        .map_err(|e| SessionError::Hashing(format!("hasher.hash: {}", e)))?;
        Ok(SecretHash(hash))
    }

    async fn verify(&self, provided: &str, stored: &SecretHash) -> bool {
        let argon2 = self.argon2.clone();
        let provided = provided.to_owned();
        let stored = stored.as_str().to_owned();
        let verdict = tokio::task::spawn_blocking(move || {
            let Ok(parsed) = PasswordHash::new(&stored) else {
                return false;
            };
            argon2.verify_password(provided.as_bytes(), &parsed).is_ok()
        })
        .await;

        match verdict {
            Ok(ok) => ok,
            Err(e) => {
                warn!("hasher.verify task failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn fast_hasher() -> Argon2SecretHasher {
    Argon2SecretHasher::new(HasherParams {
        memory_kib: 8,
        iterations: 1,
        parallelism: 1,
    })
    .unwrap()
}
