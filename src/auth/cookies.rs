use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{User, UserRole};

pub const AUTH_COOKIE: &str = "auth_token";
pub const USER_COOKIE: &str = "user_data";

/// Profile the frontend reads from the `user_data` cookie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

impl From<&User> for UserData {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

pub fn encode_user_data(data: &UserData) -> Result<String, serde_json::Error> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(data)?))
}

pub fn decode_user_data(value: &str) -> Option<UserData> {
    let bytes = URL_SAFE_NO_PAD.decode(value).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Add the `auth_token` / `user_data` pair
///
/// Only `auth_token` is HttpOnly; the frontend reads `user_data` directly.
pub fn with_session(
    jar: CookieJar,
    token: String,
    user: &User,
    ttl_secs: i64,
    secure: bool,
) -> Result<CookieJar, serde_json::Error> {
    let max_age = time::Duration::seconds(ttl_secs);

    let auth = Cookie::build((AUTH_COOKIE, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(max_age);

    let profile = Cookie::build((USER_COOKIE, encode_user_data(&UserData::from(user))?))
        .path("/")
        .http_only(false)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(max_age);

    Ok(jar.add(auth).add(profile))
}

/// Expire both session cookies
pub fn clear_session(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(AUTH_COOKIE).path("/"))
        .remove(Cookie::build(USER_COOKIE).path("/"))
}

pub fn auth_token(jar: &CookieJar) -> Option<String> {
    jar.get(AUTH_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}
