pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod services;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::AppError;
pub use models::{DeliveryMethod, Identity, NotificationRequest, RecipientSpec};
pub use services::{Dispatcher, LivenessProber};
pub use state::AppState;
pub use websocket::{CloseReason, ConnectionRegistry, TransportChannel};
