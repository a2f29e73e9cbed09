// Session-bound token issuance, validation, renewal and refresh

pub mod claims;
pub mod error;
pub mod service;

pub use claims::{Claims, RefreshClaims, TokenKind};
pub use error::TokenError;
pub use service::{Identity, TokenConfig, TokenPair, TokenService};
