use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokenkeeper::application_impl::*;
use tokenkeeper::application_port::*;
use tokenkeeper::domain_model::*;
use tokenkeeper::infra_memory::*;
use tokenkeeper::logger::*;
use tokenkeeper::settings::{Cli, Parser};

// $ cargo run --bin session_demo -- --log-format=json
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let logger = Logger::new_bootstrap(cli.log_format);
    logger.reload_from_config(&LogConfig {
        filter: "tokenkeeper=debug,info".to_string(),
    })?;

    let generator = JwtCredentialGenerator::new(JwtConfig {
        issuer: "tokenkeeper.demo".to_string(),
        audience: "tokenkeeper-demo".to_string(),
        signing_key: b"session-demo-key".to_vec(),
    })?;
    let hasher = Argon2SecretHasher::new(HasherParams::default())?;
    let service: Arc<dyn SessionService> = Arc::new(RealSessionService::new(
        Arc::new(MemorySessionStore::new()),
        Arc::new(generator),
        Arc::new(hasher),
        SessionPolicy {
            access_ttl: chrono::Duration::minutes(15),
            refresh_ttl: chrono::Duration::days(30),
        },
        tracing::info_span!("session_demo"),
    ));
    let deadline = || Deadline::after(Duration::from_secs(5));

    let alice = Principal::new("alice")?;

    // Login, then one rotation.
    let first = service.issue(&alice, deadline()).await?;
    info!(expires_at = %first.refresh_token_expires_at, "alice logged in");

    let principal = service.authenticate(&first.access_token.0).await?;
    info!(%principal, "access token verified");

    let second = service
        .refresh(&alice, first.refresh_token.expose(), deadline())
        .await?;
    info!("refresh token rotated");

    // The consumed secret is dead.
    match service
        .refresh(&alice, first.refresh_token.expose(), deadline())
        .await
    {
        Err(e) if e.is_rejection() => info!(error = %e, "replay rejected"),
        Err(e) => return Err(e.into()),
        Ok(_) => return Err(anyhow::anyhow!("replayed refresh token was accepted")),
    }

    // Eight clients race on the same secret; one wins.
    let secret = second.refresh_token.expose().to_string();
    let attempts = (0..8).map(|_| {
        let service = service.clone();
        let alice = alice.clone();
        let secret = secret.clone();
        async move { service.refresh(&alice, &secret, deadline()).await }
    });
    let results = join_all(attempts).await;
    let winners = results.iter().filter(|r| r.is_ok()).count();
    info!(winners, losers = results.len() - winners, "concurrent refresh finished");

    // Forced logout.
    service.revoke(&alice, deadline()).await?;
    let after = service.refresh(&alice, &secret, deadline()).await;
    info!(rejected = after.is_err(), "alice logged out");

    Ok(())
}
