// Identity collaborator
// Resolves owner references to account state. Accounts are not owned by this
// service; the session core only needs credentials at login and a status
// check on refresh.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Account state as reported by the identity store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OwnerStatus {
    #[default]
    Active,
    Suspended,
    Deleted,
}

/// Identity attributes cached into access tokens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnerProfile {
    pub owner_ref: String,
    pub username: String,
    pub role: String,
    pub is_verified: bool,
    pub status: OwnerStatus,
}

impl OwnerProfile {
    pub fn is_active(&self) -> bool {
        self.status == OwnerStatus::Active
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account is {0:?}")]
    Inactive(OwnerStatus),

    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for identity store implementations
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Verify a username/password pair
    async fn authenticate(&self, username: &str, password: &str)
    -> Result<OwnerProfile, IdentityError>;

    /// Resolve an owner reference. `None` means the account no longer exists.
    async fn lookup(&self, owner_ref: &str) -> Result<Option<OwnerProfile>, IdentityError>;
}

/// Configured account entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticUser {
    pub id: String,
    pub username: String,
    /// Hex-encoded SHA-256 of the password
    pub password_sha256: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub status: OwnerStatus,
}

fn default_role() -> String {
    "user".to_string()
}

impl StaticUser {
    fn profile(&self) -> OwnerProfile {
        OwnerProfile {
            owner_ref: self.id.clone(),
            username: self.username.clone(),
            role: self.role.clone(),
            is_verified: self.is_verified,
            status: self.status,
        }
    }
}

/// Hex SHA-256 of a password, the format `StaticUser::password_sha256` expects
pub fn hash_password(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// In-memory identity store backed by a configured account list
pub struct StaticIdentityProvider {
    users: Arc<RwLock<HashMap<String, StaticUser>>>,
}

impl StaticIdentityProvider {
    pub fn new(users: Vec<StaticUser>) -> Self {
        let users = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            users: Arc::new(RwLock::new(users)),
        }
    }

    /// Change an account's status. Returns false for unknown owners.
    pub async fn set_status(&self, owner_ref: &str, status: OwnerStatus) -> bool {
        let mut users = self.users.write().await;
        match users.get_mut(owner_ref) {
            Some(user) => {
                user.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn remove(&self, owner_ref: &str) -> bool {
        let mut users = self.users.write().await;
        users.remove(owner_ref).is_some()
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<OwnerProfile, IdentityError> {
        let users = self.users.read().await;
        let user = users
            .values()
            .find(|u| u.username == username)
            .ok_or(IdentityError::InvalidCredentials)?;

        if !user
            .password_sha256
            .eq_ignore_ascii_case(&hash_password(password))
        {
            return Err(IdentityError::InvalidCredentials);
        }
        if user.status != OwnerStatus::Active {
            return Err(IdentityError::Inactive(user.status));
        }

        Ok(user.profile())
    }

    async fn lookup(&self, owner_ref: &str) -> Result<Option<OwnerProfile>, IdentityError> {
        let users = self.users.read().await;
        Ok(users.get(owner_ref).map(StaticUser::profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> StaticIdentityProvider {
        StaticIdentityProvider::new(vec![StaticUser {
            id: "user-123".to_string(),
            username: "alice".to_string(),
            password_sha256: hash_password("correct horse"),
            role: "admin".to_string(),
            is_verified: true,
            status: OwnerStatus::Active,
        }])
    }

    #[tokio::test]
    async fn test_authenticate() {
        let p = provider();
        let profile = p.authenticate("alice", "correct horse").await.unwrap();
        assert_eq!(profile.owner_ref, "user-123");
        assert_eq!(profile.role, "admin");
        assert!(profile.is_verified);

        assert!(matches!(
            p.authenticate("alice", "wrong").await,
            Err(IdentityError::InvalidCredentials)
        ));
        assert!(matches!(
            p.authenticate("bob", "correct horse").await,
            Err(IdentityError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn test_suspended_owner_cannot_log_in() {
        let p = provider();
        assert!(p.set_status("user-123", OwnerStatus::Suspended).await);

        assert!(matches!(
            p.authenticate("alice", "correct horse").await,
            Err(IdentityError::Inactive(OwnerStatus::Suspended))
        ));
        let profile = p.lookup("user-123").await.unwrap().unwrap();
        assert!(!profile.is_active());
    }

    #[tokio::test]
    async fn test_lookup_missing_owner() {
        let p = provider();
        assert!(p.remove("user-123").await);
        assert!(p.lookup("user-123").await.unwrap().is_none());
    }

    #[test]
    fn test_static_user_defaults() {
        let user: StaticUser = serde_yaml::from_str(
            "id: u1\nusername: bob\npassword_sha256: abc\n",
        )
        .unwrap();
        assert_eq!(user.role, "user");
        assert!(!user.is_verified);
        assert_eq!(user.status, OwnerStatus::Active);
    }
}
