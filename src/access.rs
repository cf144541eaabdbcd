//! Access Controller (C8): bearer-token authentication, master-key bypass,
//! and permission-set intersection.
//!
//! Grounded on `_accesscontroller.py`'s `__call__` flow. Token/user/
//! organization CRUD is out of scope for this crate, so where the original
//! looks up an opaque token in its identity database, this decodes a signed
//! JWT issued by the gateway operator (HS256, `settings.token_signing_key`)
//! carrying the same claims (`user_id`, `token_id`, permissions, per-router
//! limits) a DB row would have held.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{FromRequestParts, Multipart};
use axum::http::request::Parts;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::context::UserInfo;
use crate::error::{AppError, ErrorKind};
use crate::limiter::RouterLimits;

/// Claims embedded in an operator-issued API token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub user_id: u64,
    pub token_id: u64,
    pub exp: i64,
    pub permissions: Vec<String>,
    #[serde(default)]
    pub limits: HashMap<u64, RouterLimits>,
}

/// Resolves a bearer token to a [`UserInfo`] plus that caller's per-router
/// limits. Owns the signing key and the master key value, both read once
/// at startup from the config/environment (never hot-reloaded, same
/// deliberate choice the teacher's `RouterState::new` makes for its own
/// admin token and client map).
pub struct AccessController {
    signing_key: DecodingKey,
    master_key: Option<String>,
}

impl AccessController {
    pub fn new(signing_key_secret: &[u8], master_key: Option<String>) -> Self {
        Self {
            signing_key: DecodingKey::from_secret(signing_key_secret),
            master_key,
        }
    }

    /// Parse the `Authorization: Bearer <token>` header, returning the
    /// master identity on a master-key match, else a decoded+validated
    /// token's identity. Expired or malformed tokens are always rejected
    /// (the original skips expiry checks only for its `/me` endpoint, which
    /// this crate does not implement, so there is no such carve-out here).
    pub fn authenticate(&self, authorization: Option<&str>) -> Result<(UserInfo, HashMap<u64, RouterLimits>), AppError> {
        let header = authorization.ok_or(ErrorKind::AuthScheme)?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or(ErrorKind::AuthScheme)?
            .trim();

        if let Some(master) = &self.master_key {
            if !master.is_empty() && token == master {
                return Ok((UserInfo::master(), HashMap::new()));
            }
        }

        let claims = decode::<TokenClaims>(token, &self.signing_key, &Validation::default())
            .map_err(|_| ErrorKind::InvalidKey)?
            .claims;

        let user = UserInfo {
            id: claims.user_id,
            key_id: claims.token_id,
            key_name: None,
            permissions: claims.permissions,
        };
        Ok((user, claims.limits))
    }

    /// `true` iff `user` holds at least one of `required` (empty
    /// `required` always passes) — a set intersection, matching
    /// `_check_permissions`' semantics exactly. The master user's
    /// wildcard `"*"` permission always satisfies any requirement.
    pub fn has_permission(user: &UserInfo, required: &[&str]) -> bool {
        if required.is_empty() {
            return true;
        }
        if user.permissions.iter().any(|p| p == "*") {
            return true;
        }
        required.iter().any(|r| user.permissions.iter().any(|p| p == r))
    }

    pub fn check_permission(user: &UserInfo, required: &[&str]) -> Result<(), AppError> {
        if Self::has_permission(user, required) {
            Ok(())
        } else {
            Err(ErrorKind::InsufficientPermission.into())
        }
    }
}

/// A defensively parsed request body: JSON object fields plus, for
/// multipart bodies, raw file parts. Mirrors `_safely_parse_body`'s
/// JSON-or-multipart tolerance and its UTF-8-lossy fallback instead of
/// rejecting a non-UTF-8 JSON body outright.
#[derive(Debug, Default)]
pub struct ParsedBody {
    pub json: serde_json::Map<String, serde_json::Value>,
    pub files: Vec<FilePart>,
}

#[derive(Debug)]
pub struct FilePart {
    pub field_name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Parse a JSON body, tolerating invalid UTF-8 by lossily replacing it
/// rather than failing the request outright — bytes that don't round-trip
/// as JSON after replacement still parse to an empty object, same as the
/// original's broad `except` around `json.loads`.
pub fn parse_json_body(bytes: &Bytes) -> serde_json::Map<String, serde_json::Value> {
    let text = String::from_utf8_lossy(bytes);
    serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .unwrap_or_default()
}

/// Drain an axum `Multipart` extractor into a [`ParsedBody`], putting
/// non-file fields into `json` (as strings) and file fields into `files`.
pub async fn parse_multipart_body(mut multipart: Multipart) -> Result<ParsedBody, AppError> {
    let mut body = ParsedBody::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::with_source(ErrorKind::RequestFormatFailed, e.into()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        if file_name.is_some() {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| AppError::with_source(ErrorKind::RequestFormatFailed, e.into()))?;
            body.files.push(FilePart {
                field_name: name,
                file_name,
                content_type,
                bytes,
            });
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| AppError::with_source(ErrorKind::RequestFormatFailed, e.into()))?;
            body.json.insert(name, serde_json::Value::String(text));
        }
    }
    Ok(body)
}

/// Extension carrying the resolved caller identity, inserted by
/// `access_middleware` and pulled out by handlers via
/// `Extension<AuthenticatedUser>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserInfo);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ErrorKind::AuthScheme.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn controller() -> AccessController {
        AccessController::new(b"test-secret", Some("master-key".to_string()))
    }

    fn token(claims: &TokenClaims) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(b"test-secret")).unwrap()
    }

    #[test]
    fn master_key_bypasses_token_decode() {
        let ctl = controller();
        let (user, limits) = ctl.authenticate(Some("Bearer master-key")).unwrap();
        assert!(user.is_master());
        assert!(limits.is_empty());
    }

    #[test]
    fn missing_header_is_auth_scheme_error() {
        let ctl = controller();
        let err = ctl.authenticate(None).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::AuthScheme));
    }

    #[test]
    fn non_bearer_scheme_is_auth_scheme_error() {
        let ctl = controller();
        let err = ctl.authenticate(Some("Basic abc")).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::AuthScheme));
    }

    #[test]
    fn valid_token_decodes_to_user_info() {
        let ctl = controller();
        let claims = TokenClaims {
            user_id: 42,
            token_id: 7,
            exp: (chrono::Utc::now().timestamp() + 3600),
            permissions: vec!["chat".to_string()],
            limits: HashMap::new(),
        };
        let jwt = token(&claims);
        let (user, _) = ctl.authenticate(Some(&format!("Bearer {jwt}"))).unwrap();
        assert_eq!(user.id, 42);
        assert_eq!(user.key_id, 7);
    }

    #[test]
    fn expired_token_is_invalid_key() {
        let ctl = controller();
        let claims = TokenClaims {
            user_id: 42,
            token_id: 7,
            exp: chrono::Utc::now().timestamp() - 3600,
            permissions: vec![],
            limits: HashMap::new(),
        };
        let jwt = token(&claims);
        let err = ctl.authenticate(Some(&format!("Bearer {jwt}"))).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidKey));
    }

    #[test]
    fn permission_intersection_requires_a_match() {
        let user = UserInfo {
            id: 1,
            key_id: 1,
            key_name: None,
            permissions: vec!["embeddings".to_string()],
        };
        assert!(AccessController::check_permission(&user, &["chat"]).is_err());
        assert!(AccessController::check_permission(&user, &["embeddings", "chat"]).is_ok());
    }

    #[test]
    fn empty_required_permissions_always_pass() {
        let user = UserInfo {
            id: 1,
            key_id: 1,
            key_name: None,
            permissions: vec![],
        };
        assert!(AccessController::check_permission(&user, &[]).is_ok());
    }

    #[test]
    fn malformed_json_body_parses_to_empty_object() {
        let bytes = Bytes::from_static(b"not json");
        let parsed = parse_json_body(&bytes);
        assert!(parsed.is_empty());
    }

    #[test]
    fn invalid_utf8_body_does_not_panic() {
        let bytes = Bytes::from(vec![0xff, 0xfe, 0xfd]);
        let parsed = parse_json_body(&bytes);
        assert!(parsed.is_empty());
    }
}
