//! Persistence collaborator for user registrations
//!
//! Handlers reach storage only through the [`Storage`] trait so the binary
//! and tests can inject different backends.

use crate::protocol::UserRegistrationEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A persisted user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("a user with email '{0}' already exists")]
    DuplicateEmail(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

/// User persistence, assumed slow and fallible
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    async fn create_user(&self, event: &UserRegistrationEvent) -> Result<UserRecord, StorageError>;
}

/// Process-local storage keyed by email
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn user_count(&self) -> usize {
        self.users.read().await.len()
    }

    pub async fn find_by_email(&self, email: &str) -> Option<UserRecord> {
        self.users.read().await.get(&normalize_email(email)).cloned()
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn create_user(&self, event: &UserRegistrationEvent) -> Result<UserRecord, StorageError> {
        let key = normalize_email(event.email());
        let mut users = self.users.write().await;

        if users.contains_key(&key) {
            return Err(StorageError::DuplicateEmail(event.email().to_string()));
        }

        let record = UserRecord {
            id: Uuid::new_v4(),
            name: event.name().to_string(),
            email: event.email().to_string(),
            phone_number: event.phone_number().to_string(),
            created_at: Utc::now(),
        };
        users.insert(key, record.clone());
        Ok(record)
    }
}
