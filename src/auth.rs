//! Admin session: password login exchanged for a signed token cookie.

use axum::{
    Json,
    extract::{Extension, FromRequestParts},
    http::{StatusCode, header, request::Parts},
    response::IntoResponse,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_cookies::{
    Cookie, Cookies,
    cookie::{SameSite, time},
};

use crate::error::{AppError, AppResult};
use crate::startup::AppState;

pub const ADMIN_COOKIE: &str = "ub_admin";
const SESSION_HOURS: i64 = 12;
const BEARER_PREFIX: &str = "Bearer ";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

pub fn issue_token(secret: &str, login: &str) -> AppResult<String> {
    let exp = (Utc::now() + Duration::hours(SESSION_HOURS)).timestamp();
    let claims = Claims {
        sub: login.to_string(),
        exp: usize::try_from(exp).map_err(|_| AppError::Internal("clock before epoch".into()))?,
    };
    Ok(encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

pub fn verify_token(secret: &str, token: &str) -> AppResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

/// An authenticated administrator, from the `ub_admin` cookie or an
/// `Authorization: Bearer` header.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub login: String,
}

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let app_state = parts
            .extensions
            .get::<AppState>()
            .ok_or_else(|| AppError::Internal("application state missing".into()))?;

        let bearer = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix(BEARER_PREFIX))
            .map(str::to_string);

        let token = bearer
            .or_else(|| {
                parts
                    .headers
                    .get_all(header::COOKIE)
                    .into_iter()
                    .filter_map(|value| value.to_str().ok())
                    .flat_map(Cookie::split_parse)
                    .filter_map(Result::ok)
                    .find(|cookie| cookie.name() == ADMIN_COOKIE)
                    .map(|cookie| cookie.value().to_string())
            })
            .ok_or(AppError::Unauthorized)?;

        let claims = verify_token(&app_state.config.jwt_secret, &token)?;
        if claims.sub != app_state.config.admin_login {
            return Err(AppError::Unauthorized);
        }

        Ok(AdminUser { login: claims.sub })
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

fn session_cookie(token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((ADMIN_COOKIE, token))
        .path("/")
        .same_site(SameSite::Lax)
        .secure(secure)
        .http_only(true)
        .max_age(time::Duration::hours(SESSION_HOURS))
        .build()
}

pub async fn login(
    Extension(app_state): Extension<AppState>,
    cookies: Cookies,
    Json(payload): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let config = &app_state.config;
    let hash = config
        .admin_password_hash
        .as_deref()
        .ok_or_else(|| AppError::NotConfigured("Admin login is not configured".into()))?;

    let password_ok = bcrypt::verify(&payload.password, hash).unwrap_or_else(|e| {
        error!("admin password hash is unusable: {}", e);
        false
    });
    if payload.login != config.admin_login || !password_ok {
        warn!(login = %payload.login, "admin login rejected");
        return Err(AppError::Unauthorized);
    }

    let token = issue_token(&config.jwt_secret, &config.admin_login)?;
    cookies.add(session_cookie(token.clone(), config.cookie_secure));
    info!(login = %config.admin_login, "admin logged in");

    Ok((
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "login": config.admin_login,
            "token": token,
        })),
    ))
}

pub async fn logout(
    Extension(app_state): Extension<AppState>,
    cookies: Cookies,
) -> impl IntoResponse {
    let mut cookie = session_cookie(String::new(), app_state.config.cookie_secure);
    cookie.set_max_age(time::Duration::ZERO);
    cookies.add(cookie);
    Json(json!({ "ok": true }))
}

pub async fn current(admin: AdminUser) -> impl IntoResponse {
    Json(json!({ "ok": true, "login": admin.login }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let token = issue_token("secret", "editor").unwrap();
        let claims = verify_token("secret", &token).unwrap();
        assert_eq!(claims.sub, "editor");
    }

    #[test]
    fn token_with_wrong_secret_is_rejected() {
        let token = issue_token("secret", "editor").unwrap();
        assert!(matches!(
            verify_token("other", &token),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            verify_token("secret", "not-a-token"),
            Err(AppError::Unauthorized)
        ));
    }
}
