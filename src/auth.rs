//! Credential & identity gate.
//!
//! Bearer tokens are compact HS256 JWTs carrying `sub`, `handle`, `role`,
//! `iat`, and `exp`. The gate checks the signature (constant-time) and expiry,
//! then re-reads the user record so that a role change or deletion takes
//! effect on the very next request. The claims' `role` is informational only.
//!
//! Every failure, whatever its cause, collapses to
//! [`ChatError::Unauthenticated`]. The specific reason is logged at `debug`.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

use chathome_core::models::{Identity, User};
use chathome_core::store::Store;
use chathome_core::ChatError;

type HmacSha256 = Hmac<Sha256>;

const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub handle: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Internal verification failures. Never shown to callers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is not three dot-separated segments")]
    Malformed,
    #[error("unsupported token header")]
    Header,
    #[error("signature mismatch")]
    Signature,
    #[error("claims are not valid JSON")]
    Claims,
    #[error("token expired")]
    Expired,
    #[error("signing key rejected")]
    Key,
}

fn mac(secret: &[u8]) -> Result<HmacSha256, TokenError> {
    HmacSha256::new_from_slice(secret).map_err(|_| TokenError::Key)
}

/// Issue a token for `user`, valid for `ttl_secs` from `now` (Unix seconds).
pub fn sign_token(
    secret: &[u8],
    user: &User,
    ttl_secs: u64,
    now: i64,
) -> Result<String, TokenError> {
    let claims = Claims {
        sub: user.id.clone(),
        handle: user.handle.clone(),
        role: user.role.as_str().to_string(),
        iat: now,
        exp: now + ttl_secs as i64,
    };
    let claims_json = serde_json::to_vec(&claims).map_err(|_| TokenError::Claims)?;
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(HEADER_JSON),
        URL_SAFE_NO_PAD.encode(claims_json)
    );
    let mut m = mac(secret)?;
    m.update(signing_input.as_bytes());
    let sig = m.finalize().into_bytes();
    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(sig)))
}

/// Verify signature and expiry, returning the claims.
pub fn verify_token(secret: &[u8], token: &str, now: i64) -> Result<Claims, TokenError> {
    let mut parts = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let header_raw = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|_| TokenError::Malformed)?;
    let header_json: serde_json::Value =
        serde_json::from_slice(&header_raw).map_err(|_| TokenError::Header)?;
    if header_json.get("alg").and_then(|a| a.as_str()) != Some("HS256") {
        return Err(TokenError::Header);
    }

    let sig = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| TokenError::Malformed)?;
    let mut m = mac(secret)?;
    m.update(header.as_bytes());
    m.update(b".");
    m.update(payload.as_bytes());
    m.verify_slice(&sig).map_err(|_| TokenError::Signature)?;

    let payload_raw = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| TokenError::Malformed)?;
    let claims: Claims = serde_json::from_slice(&payload_raw).map_err(|_| TokenError::Claims)?;
    if claims.exp <= now {
        return Err(TokenError::Expired);
    }
    Ok(claims)
}

/// Pull the token out of an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolves bearer credentials to a live user identity.
#[derive(Clone)]
pub struct IdentityGate {
    store: Arc<dyn Store>,
    secret: Arc<[u8]>,
}

impl IdentityGate {
    pub fn new(store: Arc<dyn Store>, secret: impl AsRef<[u8]>) -> Self {
        Self {
            store,
            secret: Arc::from(secret.as_ref()),
        }
    }

    pub fn issue(&self, user: &User, ttl_secs: u64) -> Result<String, TokenError> {
        sign_token(&self.secret, user, ttl_secs, chrono::Utc::now().timestamp())
    }

    /// Resolve `token` to `{user_id, role, display_name}` from the current
    /// user record.
    pub async fn resolve(&self, token: Option<&str>) -> Result<Identity, ChatError> {
        let Some(token) = token else {
            debug!("auth: no bearer token");
            return Err(ChatError::Unauthenticated);
        };
        let claims = verify_token(&self.secret, token, chrono::Utc::now().timestamp())
            .map_err(|e| {
                debug!(reason = %e, "auth: token rejected");
                ChatError::Unauthenticated
            })?;
        let user = self
            .store
            .get_user(&claims.sub)
            .await
            .map_err(|e| {
                debug!(error = %e, "auth: user lookup failed");
                ChatError::Unauthenticated
            })?
            .ok_or_else(|| {
                debug!(user_id = %claims.sub, "auth: user no longer exists");
                ChatError::Unauthenticated
            })?;
        Ok(Identity::from(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chathome_core::models::Role;
    use chathome_core::store::memory::InMemoryStore;

    fn user(role: Role) -> User {
        User {
            id: "u1".into(),
            handle: "sam".into(),
            display_name: "Sam".into(),
            role,
            secret: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn sign_then_verify() {
        let t = sign_token(b"secret", &user(Role::Adult), 60, 1_000).unwrap();
        let claims = verify_token(b"secret", &t, 1_010).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.role, "adult");
        assert_eq!(claims.exp, 1_060);
    }

    #[test]
    fn any_key_length_signs() {
        for secret in [&b""[..], &[7u8; 200][..]] {
            let t = sign_token(secret, &user(Role::Adult), 60, 1_000).unwrap();
            assert!(verify_token(secret, &t, 1_010).is_ok());
        }
    }

    #[test]
    fn rejects_wrong_secret_expiry_and_garbage() {
        let t = sign_token(b"secret", &user(Role::Adult), 60, 1_000).unwrap();
        assert_eq!(verify_token(b"other", &t, 1_010), Err(TokenError::Signature));
        assert_eq!(verify_token(b"secret", &t, 1_060), Err(TokenError::Expired));
        assert_eq!(verify_token(b"secret", "abc", 0), Err(TokenError::Malformed));
        assert_eq!(
            verify_token(b"secret", "a.b.c.d", 0),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let t = sign_token(b"secret", &user(Role::Kid), 60, 1_000).unwrap();
        let parts: Vec<&str> = t.split('.').collect();
        let forged_claims = URL_SAFE_NO_PAD.encode(
            r#"{"sub":"u1","handle":"sam","role":"admin","iat":1000,"exp":99999}"#,
        );
        let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);
        assert_eq!(
            verify_token(b"secret", &forged, 1_010),
            Err(TokenError::Signature)
        );
    }

    #[test]
    fn bearer_header_parsing() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(Some("Bearer ")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[tokio::test]
    async fn gate_rereads_user_record() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_user(&user(Role::Kid)).await.unwrap();
        let gate = IdentityGate::new(store.clone(), "s3cret");

        // Token claims say admin; the stored role wins.
        let mut admin = user(Role::Admin);
        admin.display_name = "Stale".into();
        let token = gate.issue(&admin, 60).unwrap();
        let identity = gate.resolve(Some(&token)).await.unwrap();
        assert_eq!(identity.role, Role::Kid);
        assert_eq!(identity.display_name, "Sam");
    }

    #[tokio::test]
    async fn every_failure_is_unauthenticated() {
        let store = Arc::new(InMemoryStore::new());
        let gate = IdentityGate::new(store, "s3cret");
        let ghost = gate.issue(&user(Role::Adult), 60).unwrap();

        assert_eq!(gate.resolve(None).await, Err(ChatError::Unauthenticated));
        assert_eq!(
            gate.resolve(Some("junk")).await,
            Err(ChatError::Unauthenticated)
        );
        // Valid signature, but the user does not exist.
        assert_eq!(
            gate.resolve(Some(&ghost)).await,
            Err(ChatError::Unauthenticated)
        );
    }
}
