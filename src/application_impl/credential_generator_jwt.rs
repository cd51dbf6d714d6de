use crate::application_port::*;
use crate::domain_model::*;
use argon2::password_hash::rand_core::{OsRng, RngCore};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

const REFRESH_SECRET_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub issuer: String,
    pub audience: String,
    pub signing_key: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccessClaims {
    sub: String,
    exp: i64,
    iat: i64,
    iss: String,
    aud: String,
    jti: String,
}

/// HS512 access tokens plus OS-random refresh secrets.
pub struct JwtCredentialGenerator {
    cfg: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtCredentialGenerator {
    pub fn new(cfg: JwtConfig) -> Result<Self, SessionError> {
        if cfg.signing_key.is_empty() {
            return Err(SessionError::Config("empty signing key".to_string()));
        }
        let encoding_key = EncodingKey::from_secret(&cfg.signing_key);
        let decoding_key = DecodingKey::from_secret(&cfg.signing_key);
        Ok(JwtCredentialGenerator {
            cfg,
            encoding_key,
            decoding_key,
        })
    }

    #[inline]
    fn new_jti() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    fn validation(&self) -> Validation {
        let mut v = Validation::new(Algorithm::HS512);
        v.validate_exp = true;
        v.leeway = 0;
        v.set_audience(&[self.cfg.audience.clone()]);
        v.set_issuer(&[self.cfg.issuer.clone()]);
        v.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        v
    }
}

#[async_trait::async_trait]
impl CredentialGenerator for JwtCredentialGenerator {
    async fn new_access_token(
        &self,
        principal: &Principal,
        ttl: Duration,
    ) -> Result<(AccessToken, DateTime<Utc>), SessionError> {
        let iat_dt = Utc::now();
        let exp_dt = expires_at(iat_dt, ttl)?;
        let claims = AccessClaims {
            sub: principal.to_string(),
            exp: exp_dt.timestamp(),
            iat: iat_dt.timestamp(),
            iss: self.cfg.issuer.clone(),
            aud: self.cfg.audience.clone(),
            jti: Self::new_jti(),
        };
        let token = encode(&Header::new(Algorithm::HS512), &claims, &self.encoding_key)
            .map_err(|e| SessionError::Signing(format!("generator.access_token: {}", e)))?;
        Ok((AccessToken(token), exp_dt))
    }

    async fn new_refresh_secret(&self) -> Result<RefreshSecret, SessionError> {
        let mut buf = [0u8; REFRESH_SECRET_LEN];
        OsRng
            .try_fill_bytes(&mut buf)
            .map_err(|e| SessionError::Entropy(format!("generator.refresh_secret: {}", e)))?;
        Ok(RefreshSecret(hex::encode(buf)))
    }

    async fn verify_access_token(&self, token: &AccessToken) -> Result<Principal, SessionError> {
        let data = decode::<AccessClaims>(&token.0, &self.decoding_key, &self.validation())
            .map_err(|_| SessionError::InvalidCredential)?;
        Principal::new(data.claims.sub).map_err(|_| SessionError::InvalidCredential)
    }
}

#[cfg(test)]
pub(crate) fn test_generator() -> JwtCredentialGenerator {
    JwtCredentialGenerator::new(JwtConfig {
        issuer: "tokenkeeper.test".to_string(),
        audience: "tokenkeeper-client".to_string(),
        signing_key: b"qwerty".to_vec(),
    })
    .unwrap()
}
