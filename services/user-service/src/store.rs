//! User records and the persistence seam.
//!
//! The real store is a document database owned by another part of the
//! platform; this service only depends on the [`UserStore`] trait. The
//! in-memory implementation backs tests and the smoke binary.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

/// An account record as the user service sees it.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub age: u32,
    pub address: Option<String>,
    pub city: Option<String>,
    pub zip: Option<u32>,
    /// Latest unconsumed reset token. At most one is live per user;
    /// issuing a new one invalidates whatever was here before.
    pub reset_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("user store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn save(&self, user: &User) -> Result<(), StoreError>;
}

/// In-memory store keyed by email.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: User) {
        self.users
            .lock()
            .unwrap()
            .insert(user.email.clone(), user);
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.lock().unwrap().get(email).cloned())
    }

    async fn save(&self, user: &User) -> Result<(), StoreError> {
        self.users
            .lock()
            .unwrap()
            .insert(user.email.clone(), user.clone());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_user(email: &str) -> User {
    User {
        id: format!("user-{email}"),
        username: email.split('@').next().unwrap_or("user").to_string(),
        email: email.to_string(),
        password_hash: "$2b$10$test".to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        age: 30,
        address: None,
        city: None,
        zip: None,
        reset_token: None,
    }
}
