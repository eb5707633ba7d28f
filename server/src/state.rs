//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! passed by reference into services. It owns the three long-lived
//! components: the document store, the presence registry, and the
//! broadcast channel. Each is a cheap handle, so cloning the state is cheap.

use std::sync::Arc;

use crate::channel::BroadcastChannel;
use crate::config::ServerConfig;
use crate::llm::LlmChat;
use crate::presence::{PresenceConfig, PresenceRegistry};
use crate::services::activity::DEFAULT_ACTIVITY_FEED_LIMIT;
use crate::store::BoardStore;

/// Clone is required by Axum; all inner fields are Arc-backed handles.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BoardStore>,
    pub presence: PresenceRegistry,
    pub channel: BroadcastChannel,
    /// Optional LLM client. `None` if LLM env vars are not configured.
    pub llm: Option<Arc<dyn LlmChat>>,
    pub config: ServerConfig,
    /// Default number of records served by the activity feed.
    pub activity_feed_limit: usize,
}

impl AppState {
    #[must_use]
    pub fn new(
        store: Arc<dyn BoardStore>,
        presence_config: PresenceConfig,
        llm: Option<Arc<dyn LlmChat>>,
        config: ServerConfig,
    ) -> Self {
        Self {
            store,
            presence: PresenceRegistry::new(presence_config),
            channel: BroadcastChannel::new(),
            llm,
            config,
            activity_feed_limit: DEFAULT_ACTIVITY_FEED_LIMIT,
        }
    }

    #[must_use]
    pub fn with_activity_feed_limit(mut self, limit: usize) -> Self {
        self.activity_feed_limit = limit.max(1);
        self
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
