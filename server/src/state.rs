use std::sync::Arc;

use crate::chat::store::MessageStore;
use crate::config::ChatConfig;
use crate::ws::hub::HubHandle;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Sending side of the session router
    pub hub: HubHandle,
    /// Message persistence, shared with the router
    pub store: Arc<dyn MessageStore>,
    /// JWT verification secret
    pub jwt_secret: Vec<u8>,
    /// Connection and routing tuning
    pub chat: ChatConfig,
    /// Client for the media service
    pub http: reqwest::Client,
}
