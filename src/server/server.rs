use crate::api::v1::ApiConfig;
use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::settings::Settings;
use anyhow::anyhow;
use sqlx::MySqlPool;
use std::sync::Arc;
use std::time::Duration;

pub struct Server {
    pub session_service: Arc<dyn SessionService>,
    pub api: ApiConfig,
    pool: Option<MySqlPool>,
}

impl Server {
    pub fn new(session_service: Arc<dyn SessionService>, api: ApiConfig) -> Self {
        Self {
            session_service,
            api,
            pool: None,
        }
    }

    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let signing_key = settings
            .auth
            .signing_key
            .clone()
            .unwrap_or_default()
            .into_bytes();
        let generator: Arc<dyn CredentialGenerator> =
            Arc::new(JwtCredentialGenerator::new(JwtConfig {
                issuer: settings.auth.issuer.clone(),
                audience: settings.auth.audience.clone(),
                signing_key,
            })?);

        let hasher: Arc<dyn SecretHasher> = Arc::new(Argon2SecretHasher::new(HasherParams {
            memory_kib: settings.hasher.memory_kib,
            iterations: settings.hasher.iterations,
            parallelism: settings.hasher.parallelism,
        })?);

        let policy = SessionPolicy::from_secs(
            settings.auth.access_ttl_secs,
            settings.auth.refresh_ttl_secs,
        )?;

        let (store, pool): (Arc<dyn SessionStore>, Option<MySqlPool>) =
            match settings.session.backend.as_str() {
                "memory" => (Arc::new(MemorySessionStore::new()), None),
                "redis" => {
                    let dsn = settings
                        .session
                        .redis_dsn
                        .as_deref()
                        .ok_or_else(|| anyhow!("session.redis_dsn is required for redis"))?;
                    let redis_client = redis::Client::open(dsn)?;
                    let redis_manager = redis_client.get_connection_manager().await?;
                    let store = RedisSessionStore::new(
                        redis_manager,
                        settings.session.key_prefix.clone(),
                    );
                    (Arc::new(store), None)
                }
                "mysql" => {
                    let dsn = settings
                        .session
                        .mysql_dsn
                        .as_deref()
                        .ok_or_else(|| anyhow!("session.mysql_dsn is required for mysql"))?;
                    let pool = MySqlPool::connect(dsn).await?;
                    let store = MySqlSessionStore::new(pool.clone());
                    store.migrate().await?;
                    (Arc::new(store), Some(pool))
                }
                other => return Err(anyhow!("Unknown session backend: {}", other)),
            };

        let session_service: Arc<dyn SessionService> = Arc::new(RealSessionService::new(
            store,
            generator,
            hasher,
            policy,
            tracing::info_span!("session"),
        ));

        let api = ApiConfig {
            request_timeout: Duration::from_millis(settings.http.request_timeout_ms),
            secure_cookie: settings.http.secure_cookie,
        };

        info!(backend = %settings.session.backend, "server started");

        Ok(Self {
            session_service,
            api,
            pool,
        })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}
