#![allow(dead_code)]

use std::sync::Arc;

use actix_web::web;
use notification_relay::{
    auth::{AuthError, IdentityVerifier},
    config::Config,
    services::NotificationQueue,
    websocket::ConnectionRegistry,
    AppState, Identity, NotificationRequest,
};
use tokio::sync::mpsc;

pub const GOOD_TOKEN: &str = "good-token";

/// Accepts exactly one credential
pub struct StubVerifier;

impl IdentityVerifier for StubVerifier {
    fn verify(&self, credential: &str) -> Result<Identity, AuthError> {
        if credential == GOOD_TOKEN {
            Ok(Identity::new("sender", "ops"))
        } else {
            Err(AuthError::Invalid)
        }
    }
}

pub struct TestContext {
    pub state: web::Data<AppState>,
    pub registry: ConnectionRegistry,
    pub queue_rx: mpsc::Receiver<NotificationRequest>,
}

pub fn test_context() -> TestContext {
    let config = Config::from_lookup(|_| None).expect("default config");
    let registry = ConnectionRegistry::new();
    let (queue, queue_rx) = NotificationQueue::new(config.relay.queue_capacity);

    let state = AppState::new(registry.clone(), Arc::new(StubVerifier), queue);

    TestContext {
        state: web::Data::new(state),
        registry,
        queue_rx,
    }
}

/// `message=<text>&receivers=<recipients json>`, form-encoded
pub fn form_body(message: &str, receivers: &str) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("message", message)
        .append_pair("receivers", receivers)
        .finish()
}
