use super::error::*;
use crate::application_port::*;
use crate::domain_model::*;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use warp::http::HeaderValue;
use warp::http::header::SET_COOKIE;
use warp::reply::Response;
use warp::{self, Reply, reject};

pub const REFRESH_COOKIE: &str = "refresh_token";
pub const ACCESS_COOKIE: &str = "access_token";
const COOKIE_PATH: &str = "/api/v1";

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub request_timeout: Duration,
    pub secure_cookie: bool,
}

impl ApiConfig {
    fn deadline(&self) -> Deadline {
        Deadline::after(self.request_timeout)
    }
}

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(code: ApiErrorCode, message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            error: Some(ApiError {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub user_name: Principal,
    pub access_token: AccessToken,
    pub access_token_expires_at: DateTime<Utc>,
    pub refresh_token: RefreshSecret,
    pub refresh_token_expires_at: DateTime<Utc>,
}

fn parse_principal(name: Option<String>) -> Result<Principal, warp::Rejection> {
    let name = name.ok_or_else(|| reject::custom(ApiErrorCode::MissingPrincipal))?;
    Principal::new(name).map_err(|_| reject::custom(ApiErrorCode::InvalidPrincipal))
}

fn http_date(at: DateTime<Utc>) -> String {
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

struct Cookie<'a> {
    name: &'a str,
    value: &'a str,
    expires_at: DateTime<Utc>,
    http_only: bool,
}

impl Cookie<'_> {
    fn render(&self, now: DateTime<Utc>, api: &ApiConfig) -> String {
        let max_age = (self.expires_at - now).num_seconds().max(0);
        let mut cookie = format!(
            "{}={}; Path={}; Expires={}; Max-Age={}",
            self.name,
            self.value,
            COOKIE_PATH,
            http_date(self.expires_at),
            max_age,
        );
        if self.http_only {
            cookie.push_str("; HttpOnly");
        }
        cookie.push_str("; SameSite=Strict");
        if api.secure_cookie {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

fn session_cookies(tokens: &SessionTokens, api: &ApiConfig) -> [String; 2] {
    let now = Utc::now();
    [
        Cookie {
            name: REFRESH_COOKIE,
            value: tokens.refresh_token.expose(),
            expires_at: tokens.refresh_token_expires_at,
            http_only: true,
        }
        .render(now, api),
        // Readable by page scripts, which send it back as a Bearer token.
        Cookie {
            name: ACCESS_COOKIE,
            value: &tokens.access_token.0,
            expires_at: tokens.access_token_expires_at,
            http_only: false,
        }
        .render(now, api),
    ]
}

fn cleared_cookies(api: &ApiConfig) -> [String; 2] {
    let epoch = DateTime::<Utc>::UNIX_EPOCH;
    [(REFRESH_COOKIE, true), (ACCESS_COOKIE, false)].map(|(name, http_only)| {
        Cookie {
            name,
            value: "",
            expires_at: epoch,
            http_only,
        }
        .render(epoch, api)
    })
}

fn with_cookies(reply: impl warp::Reply, cookies: &[String]) -> Result<Response, warp::Rejection> {
    let mut res = reply.into_response();
    for cookie in cookies {
        let value = HeaderValue::from_str(cookie)
            .map_err(|e| reject::custom(ApiErrorCode::internal(e)))?;
        res.headers_mut().append(SET_COOKIE, value);
    }
    Ok(res)
}

fn token_reply(
    principal: Principal,
    tokens: SessionTokens,
    api: &ApiConfig,
) -> Result<Response, warp::Rejection> {
    let cookies = session_cookies(&tokens, api);
    let response = TokenResponse {
        user_name: principal,
        access_token: tokens.access_token,
        access_token_expires_at: tokens.access_token_expires_at,
        refresh_token: tokens.refresh_token,
        refresh_token_expires_at: tokens.refresh_token_expires_at,
    };
    with_cookies(warp::reply::json(&ApiResponse::ok(response)), &cookies)
}

pub async fn issue(
    name: Option<String>,
    session_service: Arc<dyn SessionService>,
    api: ApiConfig,
) -> Result<Response, warp::Rejection> {
    let principal = parse_principal(name)?;

    let tokens = session_service
        .issue(&principal, api.deadline())
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    token_reply(principal, tokens, &api)
}

pub async fn refresh(
    name: Option<String>,
    header_token: Option<String>,
    cookie_token: Option<String>,
    session_service: Arc<dyn SessionService>,
    api: ApiConfig,
) -> Result<Response, warp::Rejection> {
    let principal = parse_principal(name)?;
    let secret = header_token
        .filter(|s| !s.is_empty())
        .or(cookie_token.filter(|s| !s.is_empty()))
        .ok_or_else(|| reject::custom(ApiErrorCode::MissingRefreshToken))?;

    let tokens = session_service
        .refresh(&principal, &secret, api.deadline())
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    token_reply(principal, tokens, &api)
}

pub async fn logout(
    principal: Principal,
    session_service: Arc<dyn SessionService>,
    api: ApiConfig,
) -> Result<Response, warp::Rejection> {
    session_service
        .revoke(&principal, api.deadline())
        .await
        .map_err(ApiErrorCode::from)
        .map_err(reject::custom)?;

    with_cookies(warp::reply::json(&ApiResponse::ok(())), &cleared_cookies(&api))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(secure: bool) -> ApiConfig {
        ApiConfig {
            request_timeout: Duration::from_secs(1),
            secure_cookie: secure,
        }
    }

    fn tokens(issued_at: DateTime<Utc>) -> SessionTokens {
        SessionTokens {
            access_token: AccessToken("jwt".into()),
            refresh_token: RefreshSecret("abc".into()),
            access_token_expires_at: issued_at + chrono::Duration::minutes(15),
            refresh_token_expires_at: issued_at + chrono::Duration::days(30),
        }
    }

    #[test]
    fn refresh_cookie_is_scoped_and_script_proof() {
        let now = Utc::now();
        let t = tokens(now);
        let cookie = Cookie {
            name: REFRESH_COOKIE,
            value: t.refresh_token.expose(),
            expires_at: t.refresh_token_expires_at,
            http_only: true,
        }
        .render(now, &api(false));
        assert!(cookie.starts_with("refresh_token=abc;"));
        assert!(cookie.contains("Path=/api/v1"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=2592000"));
        assert!(cookie.contains(&format!("Expires={};", http_date(t.refresh_token_expires_at))));
        assert!(!cookie.contains("Secure"));
    }

    #[test]
    fn cookies_expire_with_their_tokens() {
        let issued_at = Utc::now() - chrono::Duration::seconds(5);
        let t = tokens(issued_at);
        let [refresh, access] = session_cookies(&t, &api(false));

        assert!(refresh.contains(&http_date(t.refresh_token_expires_at)));
        assert!(access.starts_with("access_token=jwt;"));
        assert!(access.contains(&http_date(t.access_token_expires_at)));
        assert!(!access.contains("HttpOnly"));
        assert!(access.contains("SameSite=Strict"));
    }

    #[test]
    fn secure_flag_follows_config() {
        let [refresh, access] = session_cookies(&tokens(Utc::now()), &api(true));
        assert!(refresh.ends_with("; Secure"));
        assert!(access.ends_with("; Secure"));
        for cleared in cleared_cookies(&api(true)) {
            assert!(cleared.contains("Max-Age=0"));
            assert!(cleared.ends_with("; Secure"));
        }
    }

    #[test]
    fn http_date_format() {
        let at = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        assert_eq!(http_date(at), "Thu, 01 Jan 1970 00:00:00 GMT");
    }
}
