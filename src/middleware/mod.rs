pub mod auth;

pub use auth::{AuthContext, RENEWED_ACCESS_HEADER, bearer_token, require_session};
