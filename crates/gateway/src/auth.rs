//! Caller identity.
//!
//! Bearer tokens have the form `<user_id>.<expires_unix>.<hex hmac>`,
//! signed with HMAC-SHA256 over `<user_id>.<expires_unix>` using the
//! secret read from the env var named by `auth.secret_env`. The secret is
//! read **once at startup**. Without a secret the server runs in dev mode
//! and trusts the `auth.dev_user_header` header instead.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use lx_domain::config::ApiAuthConfig;
use lx_domain::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Caller assumed in dev mode when no user header is sent.
pub const DEV_USER: &str = "anonymous";

/// The authenticated caller, inserted into request extensions by the
/// auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Token signing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload.as_bytes());
        mac
    }

    /// Issue a token for `user_id` valid for `ttl_secs`.
    pub fn issue(&self, user_id: &str, ttl_secs: u64) -> Result<String> {
        if user_id.is_empty() || user_id.contains('.') {
            return Err(Error::InvalidInput(
                "user id must be non-empty and must not contain '.'".into(),
            ));
        }
        let expires = chrono::Utc::now().timestamp() + ttl_secs as i64;
        let payload = format!("{user_id}.{expires}");
        let sig = hex::encode(self.mac(&payload).finalize().into_bytes());
        Ok(format!("{payload}.{sig}"))
    }

    /// Check signature and expiry; returns the user id.
    pub fn verify(&self, token: &str) -> Result<String> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(sig), Some(expires), Some(user_id)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Auth("malformed token".into()));
        };
        if user_id.is_empty() {
            return Err(Error::Auth("malformed token".into()));
        }

        let provided = hex::decode(sig).map_err(|_| Error::Auth("malformed token".into()))?;
        let expected = self
            .mac(&format!("{user_id}.{expires}"))
            .finalize()
            .into_bytes();
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            return Err(Error::Auth("invalid token signature".into()));
        }

        let expires: i64 = expires
            .parse()
            .map_err(|_| Error::Auth("malformed token".into()))?;
        if expires < chrono::Utc::now().timestamp() {
            return Err(Error::Auth("token expired".into()));
        }
        Ok(user_id.to_owned())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Authenticator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub enum Authenticator {
    Signed(TokenSigner),
    /// No secret configured: the caller names itself via a header,
    /// falling back to [`DEV_USER`].
    Dev { header: String },
}

impl Authenticator {
    pub fn from_config(config: &ApiAuthConfig) -> Self {
        match std::env::var(&config.secret_env) {
            Ok(secret) if !secret.is_empty() => Self::Signed(TokenSigner::new(secret)),
            _ => {
                tracing::warn!(
                    env = %config.secret_env,
                    header = %config.dev_user_header,
                    "auth secret not set, running in dev mode (callers are trusted)"
                );
                Self::Dev {
                    header: config.dev_user_header.to_ascii_lowercase(),
                }
            }
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev { .. })
    }

    /// Resolve the caller from an explicit token (WebSocket `?token=`) or
    /// the request headers.
    pub fn authenticate(&self, token: Option<&str>, headers: &HeaderMap) -> Result<AuthUser> {
        match self {
            Self::Signed(signer) => {
                let token = token
                    .filter(|t| !t.is_empty())
                    .or_else(|| bearer_token(headers))
                    .ok_or_else(|| Error::Auth("missing bearer token".into()))?;
                let user_id = signer.verify(token)?;
                Ok(AuthUser { user_id })
            }
            Self::Dev { header } => {
                let user_id = headers
                    .get(header.as_str())
                    .and_then(|v| v.to_str().ok())
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .or_else(|| token.filter(|t| !t.is_empty()))
                    .unwrap_or(DEV_USER);
                Ok(AuthUser {
                    user_id: user_id.to_owned(),
                })
            }
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn issued_token_verifies() {
        let signer = TokenSigner::new("s3cret");
        let token = signer.issue("alice", 60).unwrap();
        assert_eq!(signer.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn tampered_or_foreign_tokens_are_rejected() {
        let signer = TokenSigner::new("s3cret");
        let token = signer.issue("alice", 60).unwrap();
        let forged = token.replacen("alice", "mallory", 1);
        assert!(signer.verify(&forged).is_err());
        assert!(TokenSigner::new("other").verify(&token).is_err());
        assert!(signer.verify("garbage").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let signer = TokenSigner::new("s3cret");
        let expires = chrono::Utc::now().timestamp() - 10;
        let payload = format!("alice.{expires}");
        let sig = hex::encode(signer.mac(&payload).finalize().into_bytes());
        let err = signer.verify(&format!("{payload}.{sig}")).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn dev_mode_reads_header() {
        let auth = Authenticator::Dev {
            header: "x-user-id".into(),
        };
        let mut headers = HeaderMap::new();
        assert_eq!(auth.authenticate(None, &headers).unwrap().user_id, DEV_USER);
        headers.insert("x-user-id", HeaderValue::from_static("bob"));
        assert_eq!(auth.authenticate(None, &headers).unwrap().user_id, "bob");
    }

    #[test]
    fn signed_mode_accepts_query_token_or_bearer() {
        let signer = TokenSigner::new("k");
        let token = signer.issue("carol", 60).unwrap();
        let auth = Authenticator::Signed(signer);

        assert_eq!(
            auth.authenticate(Some(&token), &HeaderMap::new())
                .unwrap()
                .user_id,
            "carol"
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        assert_eq!(auth.authenticate(None, &headers).unwrap().user_id, "carol");
        assert!(auth.authenticate(None, &HeaderMap::new()).is_err());
    }
}
