use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{Instrument, Span, info_span};

pub struct RealSessionService {
    store: Arc<dyn SessionStore>,
    generator: Arc<dyn CredentialGenerator>,
    hasher: Arc<dyn SecretHasher>,
    policy: SessionPolicy,
    span: Span,
}

impl RealSessionService {
    /// `span` is the parent of every log record the service emits.
    pub fn new(
        store: Arc<dyn SessionStore>,
        generator: Arc<dyn CredentialGenerator>,
        hasher: Arc<dyn SecretHasher>,
        policy: SessionPolicy,
        span: Span,
    ) -> Self {
        Self {
            store,
            generator,
            hasher,
            policy,
            span,
        }
    }

    async fn new_tokens(
        &self,
        principal: &Principal,
        refresh_token_expires_at: DateTime<Utc>,
    ) -> Result<(SessionTokens, SecretHash), SessionError> {
        let refresh_token = self.generator.new_refresh_secret().await?;
        let (access_token, access_token_expires_at) = self
            .generator
            .new_access_token(principal, self.policy.access_ttl)
            .await?;
        let secret_hash = self.hasher.hash(&refresh_token).await?;

        let tokens = SessionTokens {
            access_token,
            refresh_token,
            access_token_expires_at,
            refresh_token_expires_at,
        };
        Ok((tokens, secret_hash))
    }

    async fn do_issue(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<SessionTokens, SessionError> {
        let refresh_expires_at = expires_at(Utc::now(), self.policy.refresh_ttl)?;

        let existing = self
            .store
            .count_by_principal(principal, deadline)
            .await
            .map_err(|e| SessionError::storage("store.count_by_principal", e))?;
        if existing > 0 {
            debug!(existing, "evicting previous sessions");
            self.store
                .delete_by_principal(principal, deadline)
                .await
                .map_err(|e| SessionError::storage("store.delete_by_principal", e))?;
        }

        let (tokens, secret_hash) = self.new_tokens(principal, refresh_expires_at).await?;

        self.store
            .put(principal, &secret_hash, Utc::now(), deadline)
            .await
            .map_err(|e| SessionError::storage("store.put", e))?;

        info!("session issued");
        Ok(tokens)
    }

    async fn do_refresh(
        &self,
        principal: &Principal,
        provided_secret: &str,
        deadline: Deadline,
    ) -> Result<SessionTokens, SessionError> {
        let record = match self.store.get(principal, deadline).await {
            Ok(record) => record,
            Err(SessionStoreError::NotFound) => {
                debug!("no session to refresh");
                return Err(SessionError::InvalidSession);
            }
            Err(e) => return Err(SessionError::storage("store.get", e)),
        };

        if !self
            .hasher
            .verify(provided_secret, &record.secret_hash)
            .await
        {
            debug!("presented secret does not match");
            return Err(SessionError::InvalidCredential);
        }

        let now = Utc::now();
        let expired = record
            .created_at
            .checked_add_signed(self.policy.refresh_ttl)
            .is_some_and(|expiry| expiry < now);
        if expired {
            self.store
                .delete(principal, &record.secret_hash, deadline)
                .await
                .map_err(|e| SessionError::storage("store.delete", e))?;
            info!(created_at = %record.created_at, "expired session removed");
            return Err(SessionError::SessionExpired);
        }

        let refresh_expires_at = expires_at(now, self.policy.refresh_ttl)?;
        let (tokens, new_hash) = self.new_tokens(principal, refresh_expires_at).await?;

        match self
            .store
            .replace_atomically(
                principal,
                &record.secret_hash,
                &new_hash,
                Utc::now(),
                deadline,
            )
            .await
        {
            Ok(()) => {}
            Err(SessionStoreError::Conflict) => {
                warn!("rotation lost to a concurrent refresh");
                return Err(SessionError::InvalidSession);
            }
            Err(e) => return Err(SessionError::storage("store.replace_atomically", e)),
        }

        info!("session rotated");
        Ok(tokens)
    }
}

fn log_outcome<T>(result: &Result<T, SessionError>) {
    match result {
        Err(e) if e.is_rejection() => debug!(error = %e, "rejected"),
        Err(e) => error!(error = %e, "failed"),
        Ok(_) => {}
    }
}

#[async_trait::async_trait]
impl SessionService for RealSessionService {
    async fn issue(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<SessionTokens, SessionError> {
        let span = info_span!(parent: &self.span, "issue", %principal);
        let result = self.do_issue(principal, deadline).instrument(span.clone()).await;
        span.in_scope(|| log_outcome(&result));
        result
    }

    async fn refresh(
        &self,
        principal: &Principal,
        provided_secret: &str,
        deadline: Deadline,
    ) -> Result<SessionTokens, SessionError> {
        let span = info_span!(parent: &self.span, "refresh", %principal);
        let result = self
            .do_refresh(principal, provided_secret, deadline)
            .instrument(span.clone())
            .await;
        span.in_scope(|| log_outcome(&result));
        result
    }

    async fn revoke(
        &self,
        principal: &Principal,
        deadline: Deadline,
    ) -> Result<(), SessionError> {
        let span = info_span!(parent: &self.span, "revoke", %principal);
        let result = self
            .store
            .delete_by_principal(principal, deadline)
            .instrument(span.clone())
            .await
            .map_err(|e| SessionError::storage("store.delete_by_principal", e));
        span.in_scope(|| match &result {
            Ok(()) => info!("sessions revoked"),
            Err(_) => log_outcome(&result),
        });
        result
    }

    async fn authenticate(&self, access_token: &str) -> Result<Principal, SessionError> {
        self.generator
            .verify_access_token(&AccessToken(access_token.to_string()))
            .await
    }
}
