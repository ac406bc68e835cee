use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::application::ports::user_repository::UserProfile;
use crate::bootstrap::app_context::AppContext;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

pub struct Bearer(pub String);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Bearer
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        token_from_headers(&parts.headers)
            .map(Bearer)
            .ok_or(StatusCode::UNAUTHORIZED)
    }
}

/// Authorization header first, then the `access_token` cookie.
pub fn token_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(t) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(t.trim().to_string());
    }
    headers
        .get(axum::http::header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookie_hdr| get_cookie(cookie_hdr, ACCESS_TOKEN_COOKIE))
}

pub fn validate_token(secret: &str, token: &str) -> Result<String, StatusCode> {
    let data = jsonwebtoken::decode::<Claims>(
        token.trim(),
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| StatusCode::UNAUTHORIZED)?;
    if data.claims.sub.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(data.claims.sub)
}

/// Resolves the caller and checks they may edit `doc_id`.
///
/// Unknown documents are 404; a bad token, unknown user or missing edit right is 401.
pub async fn authorize_document(
    ctx: &AppContext,
    token: &str,
    doc_id: &str,
) -> Result<UserProfile, StatusCode> {
    let user_id = validate_token(&ctx.cfg.jwt_secret_pem, token)?;
    let user = ctx
        .user_repo()
        .find_by_id(&user_id)
        .await
        .map_err(|e| {
            tracing::error!(user_id = %user_id, error = ?e, "auth_user_lookup_failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let exists = ctx
        .document_repo()
        .get_by_id(doc_id)
        .await
        .map_err(|e| {
            tracing::error!(document_id = doc_id, error = ?e, "auth_document_lookup_failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .is_some();
    if !exists {
        return Err(StatusCode::NOT_FOUND);
    }
    let can_edit = ctx
        .access_repo()
        .can_edit(doc_id, &user.id)
        .await
        .map_err(|e| {
            tracing::error!(document_id = doc_id, error = ?e, "auth_access_lookup_failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    if !can_edit {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(user)
}

pub(crate) fn get_cookie(cookie_header: &str, name: &str) -> Option<String> {
    cookie_header.split(';').find_map(|part| {
        let (k, v) = part.trim().split_once('=')?;
        (k.trim() == name).then(|| v.trim().to_string())
    })
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, HeaderValue, header};
    use jsonwebtoken::{EncodingKey, Header};

    use super::*;

    fn token(secret: &str, sub: &str, exp_offset: i64) -> String {
        let exp = (chrono::Utc::now().timestamp() + exp_offset) as usize;
        jsonwebtoken::encode(
            &Header::default(),
            &Claims {
                sub: sub.into(),
                exp,
            },
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_signed_token() {
        let t = token("secret-secret-secret", "u1", 3600);
        assert_eq!(validate_token("secret-secret-secret", &t).unwrap(), "u1");
    }

    #[test]
    fn rejects_wrong_secret_and_expired() {
        let t = token("secret-a", "u1", 3600);
        assert_eq!(
            validate_token("secret-b", &t).unwrap_err(),
            StatusCode::UNAUTHORIZED
        );
        let expired = token("secret-a", "u1", -3600);
        assert!(validate_token("secret-a", &expired).is_err());
    }

    #[test]
    fn header_takes_precedence_over_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; access_token=from-cookie"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-cookie"));
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-header"));
    }

    #[test]
    fn cookie_lookup_matches_exact_name() {
        assert_eq!(get_cookie("xaccess_token=1; access_token=2", "access_token").as_deref(), Some("2"));
        assert_eq!(get_cookie("a=1", "access_token"), None);
    }
}
