use super::error::*;
use super::handler::{self, ApiConfig, REFRESH_COOKIE};
use crate::application_port::*;
use crate::domain_model::Principal;
use crate::logger::*;
use crate::server::*;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, reject};

const NAME_HEADER: &str = "name";
const TOKEN_HEADER: &str = "token";

pub fn routes(
    server: Arc<Server>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let auth = warp::post()
        .and(warp::path("auth"))
        .and(warp::path::end())
        .and(warp::header::optional::<String>(NAME_HEADER))
        .and(with(server.session_service.clone()))
        .and(with_config(server.api.clone()))
        .and_then(handler::issue);

    let refresh = warp::post()
        .and(warp::path("refresh"))
        .and(warp::path::end())
        .and(warp::header::optional::<String>(NAME_HEADER))
        .and(warp::header::optional::<String>(TOKEN_HEADER))
        .and(warp::cookie::optional(REFRESH_COOKIE))
        .and(with(server.session_service.clone()))
        .and(with_config(server.api.clone()))
        .and_then(handler::refresh);

    let logout = warp::post()
        .and(warp::path("logout"))
        .and(warp::path::end())
        .and(with_verification(server.session_service.clone()))
        .and(with(server.session_service.clone()))
        .and(with_config(server.api.clone()))
        .and_then(handler::logout);

    auth.or(refresh).or(logout)
}

/// One tracing event per request, emitted after the response status is known.
pub fn request_log() -> warp::log::Log<impl Fn(warp::log::Info<'_>) + Copy> {
    warp::log::custom(|info| {
        info!(
            method = %info.method(),
            path = info.path(),
            status = info.status().as_u16(),
            elapsed_ms = info.elapsed().as_millis() as u64,
            remote_addr = ?info.remote_addr(),
            user_agent = info.user_agent().unwrap_or("-"),
            "request completed"
        );
    })
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

fn with_config(api: ApiConfig) -> impl Filter<Extract = (ApiConfig,), Error = Infallible> + Clone {
    warp::any().map(move || api.clone())
}

fn with_verification(
    session_service: Arc<dyn SessionService>,
) -> impl Filter<Extract = (Principal,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |value: Option<String>| {
        let session_service = session_service.clone();
        async move {
            let Some(token) = value.as_deref().and_then(|v| v.strip_prefix("Bearer ")) else {
                return Err(reject::custom(ApiErrorCode::InvalidToken));
            };
            let principal = session_service
                .authenticate(token)
                .await
                .map_err(ApiErrorCode::from)
                .map_err(reject::custom)?;
            Ok(principal)
        }
    })
}
