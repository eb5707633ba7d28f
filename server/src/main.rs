mod channel;
mod config;
mod db;
mod llm;
mod presence;
mod routes;
mod services;
mod state;
mod store;

use std::sync::Arc;

use crate::llm::LlmChat;
use crate::store::{BoardStore, MemoryStore, PgStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::ServerConfig::from_env();
    let presence_config = presence::PresenceConfig::from_env().expect("invalid presence timing");

    let store: Arc<dyn BoardStore> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url).await.expect("database init failed");
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; boards live in memory and vanish on restart");
            Arc::new(MemoryStore::new())
        }
    };

    // Suggestions are optional; the rest of the API works without them.
    let llm: Option<Arc<dyn LlmChat>> = match llm::LlmClient::from_env() {
        Ok(client) => {
            tracing::info!(model = client.model(), "LLM client initialized");
            Some(Arc::new(client))
        }
        Err(e) => {
            tracing::warn!(error = %e, "LLM client not configured; task suggestions disabled");
            None
        }
    };

    let port = config.port;
    let state = state::AppState::new(store, presence_config, llm, config)
        .with_activity_feed_limit(services::activity::feed_limit_from_env());

    let _reaper = services::connection::spawn_reaper(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "boardsync listening");
    axum::serve(listener, app).await.expect("server failed");
}
