//! Business handlers shipped with the client

use crate::protocol::UserRegistrationEvent;
use crate::routing::{EventHandler, HandlerError};
use crate::storage::Storage;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Persists each registration through the injected [`Storage`]
pub struct UserRegistrationHandler<S: Storage> {
    storage: Arc<S>,
}

impl<S: Storage> UserRegistrationHandler<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<S: Storage> EventHandler<UserRegistrationEvent> for UserRegistrationHandler<S> {
    async fn handle(&self, event: UserRegistrationEvent) -> Result<(), HandlerError> {
        match self.storage.create_user(&event).await {
            Ok(user) => {
                info!(
                    user_id = %user.id,
                    name = %user.name,
                    email = %user.email,
                    "Registered user"
                );
                Ok(())
            }
            Err(e) => {
                warn!(email = %event.email(), error = %e, "User registration failed");
                Err(e.into())
            }
        }
    }
}
