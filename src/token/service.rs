// Token service
// Issues HS256 access/refresh pairs bound to a session and checks them
// against the session store. Expiry is checked against the injected clock,
// so the library's own wall-clock `exp` check is disabled.

use super::claims::{Claims, RefreshClaims, TokenClaims, TokenKind};
use super::error::TokenError;
use crate::clock::Clock;
use crate::identity::{IdentityProvider, OwnerProfile};
use crate::session::{REASON_OWNER_REVOKED, Session, SessionManager};
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// HMAC signing secret; overridden by `JWT_SECRET`
    pub secret: String,
    pub issuer: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
    /// Renew once the remaining lifetime is at most this share of the total
    pub renewal_fraction: f64,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            secret: "change-this-secret-in-production".to_string(),
            issuer: "pmp-session-api".to_string(),
            access_ttl_secs: 3600,       // 1 hour
            refresh_ttl_secs: 604_800,   // 7 days
            renewal_fraction: 1.0 / 3.0,
        }
    }
}

/// Freshly issued token pair
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
    pub session_id: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// A validated access token and the session behind it
#[derive(Debug, Clone)]
pub struct Identity {
    pub claims: Claims,
    pub session: Session,
}

pub struct TokenService {
    sessions: Arc<SessionManager>,
    identities: Arc<dyn IdentityProvider>,
    clock: Arc<dyn Clock>,
    config: TokenConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenService {
    pub fn new(
        sessions: Arc<SessionManager>,
        identities: Arc<dyn IdentityProvider>,
        config: TokenConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["sub", "exp", "iss"]);
        validation.set_issuer(&[config.issuer.as_str()]);

        Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            sessions,
            identities,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    /// Issue an access/refresh pair for `session`. Both carry its id as `sid`.
    pub fn issue(&self, owner: &OwnerProfile, session: &Session) -> Result<TokenPair, TokenError> {
        let now = self.clock.now().timestamp();
        let access_exp = now + self.config.access_ttl_secs;
        let refresh_exp = now + self.config.refresh_ttl_secs;

        let access = Claims {
            sub: owner.owner_ref.clone(),
            sid: session.session_id.clone(),
            username: owner.username.clone(),
            role: owner.role.clone(),
            is_verified: owner.is_verified,
            iat: now,
            exp: access_exp,
            iss: self.config.issuer.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
            typ: TokenKind::Access,
        };
        let refresh = RefreshClaims {
            sub: owner.owner_ref.clone(),
            sid: session.session_id.clone(),
            iat: now,
            exp: refresh_exp,
            iss: self.config.issuer.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
            typ: TokenKind::Refresh,
        };

        Ok(TokenPair {
            access: self.sign(&access)?,
            refresh: self.sign(&refresh)?,
            session_id: session.session_id.clone(),
            access_expires_at: timestamp(access_exp),
            refresh_expires_at: timestamp(refresh_exp),
        })
    }

    /// Verify an access token and the session it is bound to. Signature and
    /// expiry are checked first; a token failing those never reaches the
    /// session store.
    pub async fn validate(&self, access: &str) -> Result<Identity, TokenError> {
        let now = self.clock.now();
        let claims: Claims = self.decode(access, TokenKind::Access, now)?;

        let session = self
            .sessions
            .get_session(&claims.sid)
            .await
            .map_err(TokenError::from_access_lookup)?;

        if !session.is_valid_at(now) || session.owner_ref != claims.sub {
            debug!("Rejected access token for invalid session {}", claims.sid);
            return Err(TokenError::SessionInvalid);
        }

        Ok(Identity { claims, session })
    }

    /// Mint a replacement access token when `claims` is in its final
    /// renewal window and the session is still valid. Advisory only: errors
    /// are logged and yield `None`.
    pub async fn maybe_renew(&self, claims: &Claims, now: DateTime<Utc>) -> Option<String> {
        let total = claims.total();
        let remaining = claims.exp - now.timestamp();
        if total <= 0 || remaining <= 0 || remaining > self.renewal_threshold(total) {
            return None;
        }

        match self.sessions.get_valid_session(&claims.sid).await {
            Ok(_) => {}
            Err(e) => {
                debug!("Skipping renewal for session {}: {}", claims.sid, e);
                return None;
            }
        }

        let issued_at = now.timestamp();
        let renewed = Claims {
            iat: issued_at,
            exp: issued_at + total,
            jti: uuid::Uuid::new_v4().to_string(),
            ..claims.clone()
        };

        match self.sign(&renewed) {
            Ok(token) => {
                info!("Renewed access token for session {}", claims.sid);
                Some(token)
            }
            Err(e) => {
                warn!("Failed to renew access token for session {}: {}", claims.sid, e);
                None
            }
        }
    }

    /// Exchange a refresh token for a new pair bound to the same session.
    /// Never succeeds for an ended session, whatever the refresh token's own
    /// lifetime, nor for an owner the identity store no longer reports active.
    pub async fn refresh(&self, refresh: &str) -> Result<TokenPair, TokenError> {
        let now = self.clock.now();
        let claims: RefreshClaims = self.decode(refresh, TokenKind::Refresh, now)?;

        let session = self
            .sessions
            .get_session(&claims.sid)
            .await
            .map_err(TokenError::from_refresh_lookup)?;
        if !session.is_valid_at(now) || session.owner_ref != claims.sub {
            debug!("Rejected refresh for ended session {}", claims.sid);
            return Err(TokenError::SessionExpired);
        }

        let owner = match self.identities.lookup(&claims.sub).await {
            Ok(Some(owner)) if owner.is_active() => owner,
            Ok(_) => {
                warn!(
                    "Owner {} is no longer active, revoking session {}",
                    claims.sub, claims.sid
                );
                if let Err(e) = self
                    .sessions
                    .invalidate_session(&claims.sid, REASON_OWNER_REVOKED)
                    .await
                {
                    error!("Failed to revoke session {}: {}", claims.sid, e);
                }
                return Err(TokenError::OwnerRevoked);
            }
            Err(e) => return Err(TokenError::Unavailable(e.to_string())),
        };

        let pair = self.issue(&owner, &session)?;
        info!("Refreshed token pair for session {}", claims.sid);
        Ok(pair)
    }

    fn renewal_threshold(&self, total: i64) -> i64 {
        (total as f64 * self.config.renewal_fraction).round() as i64
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    fn decode<T>(&self, token: &str, kind: TokenKind, now: DateTime<Utc>) -> Result<T, TokenError>
    where
        T: DeserializeOwned + TokenClaims,
    {
        let data = decode::<T>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Malformed,
            }
        })?;

        let claims = data.claims;
        if claims.kind() != kind {
            return Err(TokenError::Malformed);
        }
        if claims.expires_at() <= now.timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(claims)
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
}
