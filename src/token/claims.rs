// JWT claim sets
// Decoded and checked once at the trust boundary; everything downstream reads
// these typed values.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claims common to both token kinds, used by the decoder
pub trait TokenClaims {
    fn kind(&self) -> TokenKind;
    fn expires_at(&self) -> i64;
}

/// Access token claims. Identity attributes are cached so downstream
/// authorization checks can skip the identity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Owner reference
    pub sub: String,
    /// Session id
    pub sid: String,
    pub username: String,
    pub role: String,
    pub is_verified: bool,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
    pub typ: TokenKind,
}

impl Claims {
    /// Token lifetime in seconds
    pub fn total(&self) -> i64 {
        self.exp - self.iat
    }
}

impl TokenClaims for Claims {
    fn kind(&self) -> TokenKind {
        self.typ
    }

    fn expires_at(&self) -> i64 {
        self.exp
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub sid: String,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub jti: String,
    pub typ: TokenKind,
}

impl TokenClaims for RefreshClaims {
    fn kind(&self) -> TokenKind {
        self.typ
    }

    fn expires_at(&self) -> i64 {
        self.exp
    }
}
