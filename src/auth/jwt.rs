use std::time::Duration;

use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};

use super::{
    claims::{Claims, TokenKind},
    repo::IdentityStore,
    repo_types::User,
};
use crate::{
    config::JwtConfig,
    error::{AuthError, AuthResult},
    state::AppState,
};

/// Access token plus refresh token, minted together.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signing material. Access and refresh tokens use separate secrets.
#[derive(Clone)]
pub struct JwtKeys {
    access_encoding: EncodingKey,
    access_decoding: DecodingKey,
    refresh_encoding: EncodingKey,
    refresh_decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        (*state.keys).clone()
    }
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            access_encoding: EncodingKey::from_secret(cfg.access_secret.as_bytes()),
            access_decoding: DecodingKey::from_secret(cfg.access_secret.as_bytes()),
            refresh_encoding: EncodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            refresh_decoding: DecodingKey::from_secret(cfg.refresh_secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            access_ttl: Duration::from_secs((cfg.access_ttl_minutes as u64) * 60),
            refresh_ttl: Duration::from_secs((cfg.refresh_ttl_minutes as u64) * 60),
        }
    }

    fn sign(&self, user: &User, kind: TokenKind) -> AuthResult<String> {
        let now = OffsetDateTime::now_utc();
        let (ttl, key, email) = match kind {
            TokenKind::Access => (self.access_ttl, &self.access_encoding, Some(user.email.clone())),
            TokenKind::Refresh => (self.refresh_ttl, &self.refresh_encoding, None),
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            user_id: user.id,
            email,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            kind,
        };
        let token = encode(&Header::default(), &claims, key)
            .map_err(|e| AuthError::Upstream(format!("jwt encode: {e}")))?;
        debug!(user_id = %user.id, kind = ?kind, "jwt signed");
        Ok(token)
    }

    pub fn issue(&self, user: &User) -> AuthResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.sign(user, TokenKind::Access)?,
            refresh_token: self.sign(user, TokenKind::Refresh)?,
        })
    }

    fn verify(&self, token: &str, kind: TokenKind) -> AuthResult<Claims> {
        let key = match kind {
            TokenKind::Access => &self.access_decoding,
            TokenKind::Refresh => &self.refresh_decoding,
        };
        let mut validation = Validation::default();
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let claims = decode::<Claims>(token, key, &validation)
            .map_err(|e| {
                debug!(error = %e, kind = ?kind, "jwt rejected");
                AuthError::InvalidToken
            })?
            .claims;
        if claims.kind != kind {
            warn!(user_id = %claims.user_id, expected = ?kind, "token kind mismatch");
            return Err(AuthError::InvalidToken);
        }
        Ok(claims)
    }

    pub fn verify_access(&self, token: &str) -> AuthResult<Claims> {
        self.verify(token, TokenKind::Access)
    }

    pub fn verify_refresh(&self, token: &str) -> AuthResult<Claims> {
        self.verify(token, TokenKind::Refresh)
    }

    /// Exchanges a refresh token for a new pair. The presented token is not
    /// revoked; it stays usable until its own expiry.
    pub async fn rotate(
        &self,
        refresh_token: &str,
        users: &dyn IdentityStore,
    ) -> AuthResult<(TokenPair, User)> {
        let claims = self.verify_refresh(refresh_token)?;
        let user = users.user_by_id(claims.user_id).await?.ok_or_else(|| {
            warn!(user_id = %claims.user_id, "refresh for deleted user");
            AuthError::InvalidToken
        })?;
        let pair = self.issue(&user)?;
        Ok((pair, user))
    }
}

#[cfg(test)]
pub(crate) fn test_keys() -> JwtKeys {
    JwtKeys::from_config(&JwtConfig {
        access_secret: "test-access-secret".into(),
        refresh_secret: "test-refresh-secret".into(),
        issuer: "test-issuer".into(),
        audience: "test-aud".into(),
        access_ttl_minutes: 15,
        refresh_ttl_minutes: 60 * 24 * 7,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{memory::MemoryIdentityStore, repo_types::NewUser};
    use uuid::Uuid;

    fn user() -> User {
        User {
            id: Uuid::new_v4(),
            google_id: None,
            linkedin_id: None,
            password_hash: Some("hash".into()),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@example.com".into(),
            username: "ada".into(),
            profile_image_url: None,
            description: None,
            created_at: OffsetDateTime::now_utc(),
            last_login: None,
        }
    }

    #[test]
    fn access_token_carries_user_id_and_email() {
        let keys = test_keys();
        let u = user();
        let pair = keys.issue(&u).unwrap();
        let claims = keys.verify_access(&pair.access_token).unwrap();
        assert_eq!(claims.user_id, u.id);
        assert_eq!(claims.email.as_deref(), Some("ada@example.com"));
        assert_eq!(claims.iss, "test-issuer");
        assert_eq!(claims.aud, "test-aud");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn refresh_token_has_no_email_and_week_lifetime() {
        let keys = test_keys();
        let u = user();
        let pair = keys.issue(&u).unwrap();
        let claims = keys.verify_refresh(&pair.refresh_token).unwrap();
        assert_eq!(claims.user_id, u.id);
        assert!(claims.email.is_none());
        assert_eq!(claims.exp - claims.iat, 7 * 24 * 60 * 60);
    }

    #[test]
    fn tokens_are_not_interchangeable() {
        let keys = test_keys();
        let pair = keys.issue(&user()).unwrap();
        assert!(matches!(keys.verify_refresh(&pair.access_token), Err(AuthError::InvalidToken)));
        assert!(matches!(keys.verify_access(&pair.refresh_token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = test_keys();
        let past = OffsetDateTime::now_utc() - TimeDuration::hours(1);
        let claims = Claims {
            user_id: Uuid::new_v4(),
            email: Some("ada@example.com".into()),
            iat: (past - TimeDuration::minutes(15)).unix_timestamp() as usize,
            exp: past.unix_timestamp() as usize,
            iss: keys.issuer.clone(),
            aud: keys.audience.clone(),
            kind: TokenKind::Access,
        };
        let token = encode(&Header::default(), &claims, &keys.access_encoding).unwrap();
        assert!(matches!(keys.verify_access(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn token_just_past_expiry_is_rejected() {
        let keys = test_keys();
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            user_id: Uuid::new_v4(),
            email: None,
            iat: (now - TimeDuration::minutes(10)).unix_timestamp() as usize,
            exp: (now - TimeDuration::seconds(30)).unix_timestamp() as usize,
            iss: keys.issuer.clone(),
            aud: keys.audience.clone(),
            kind: TokenKind::Refresh,
        };
        let token = encode(&Header::default(), &claims, &keys.refresh_encoding).unwrap();
        assert!(matches!(keys.verify_refresh(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let keys = test_keys();
        let mut other = test_keys();
        other.audience = "someone-else".into();
        let pair = other.issue(&user()).unwrap();
        assert!(keys.verify_access(&pair.access_token).is_err());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(test_keys().verify_access("not.a.jwt"), Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn rotate_issues_fresh_pair_for_existing_user() {
        let store = MemoryIdentityStore::new();
        let now = OffsetDateTime::now_utc();
        let u = store
            .insert_user(NewUser {
                google_id: None,
                linkedin_id: None,
                password_hash: Some("hash".into()),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                email: "ada@example.com".into(),
                username: "ada".into(),
                profile_image_url: None,
                created_at: now,
                last_login: None,
            })
            .await
            .unwrap();
        let keys = test_keys();
        let pair = keys.issue(&u).unwrap();
        let (rotated, loaded) = keys.rotate(&pair.refresh_token, &store).await.unwrap();
        assert_eq!(loaded.id, u.id);
        assert_eq!(keys.verify_access(&rotated.access_token).unwrap().user_id, u.id);
        // old refresh token is still valid until expiry
        assert!(keys.rotate(&pair.refresh_token, &store).await.is_ok());
    }

    #[tokio::test]
    async fn rotate_fails_for_missing_user() {
        let store = MemoryIdentityStore::new();
        let keys = test_keys();
        let pair = keys.issue(&user()).unwrap();
        let err = keys.rotate(&pair.refresh_token, &store).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidToken));
    }
}
