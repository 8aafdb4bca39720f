use std::sync::Arc;

use crate::auth::IdentityVerifier;
use crate::services::NotificationQueue;
use crate::websocket::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub registry: ConnectionRegistry,
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Producer side of the queue drained by the dispatcher
    pub queue: NotificationQueue,
}

impl AppState {
    pub fn new(
        registry: ConnectionRegistry,
        verifier: Arc<dyn IdentityVerifier>,
        queue: NotificationQueue,
    ) -> Self {
        Self {
            registry,
            verifier,
            queue,
        }
    }
}
