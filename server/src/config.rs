//! Process configuration read from environment variables.
//!
//! Each subsystem owns its own `DEFAULT_*` constants and `from_env()`; this
//! module holds the server-level knobs and the shared parsing helpers.

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;

/// Parse `key` as `T`, falling back to `default` when unset or malformed.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key).ok().and_then(|raw| parse_bool(&raw))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// `None` runs against the in-memory store.
    pub database_url: Option<String>,
    /// Outbound frame queue depth per websocket connection.
    pub client_queue_capacity: usize,
    /// Enables `POST /api/dev/session`.
    pub dev_auth_bypass: bool,
    pub cookie_secure: bool,
}

impl ServerConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url: std::env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            client_queue_capacity: env_parse("CLIENT_QUEUE_CAPACITY", DEFAULT_CLIENT_QUEUE_CAPACITY).max(1),
            dev_auth_bypass: env_bool("DEV_AUTH_BYPASS").unwrap_or(false),
            cookie_secure: env_bool("COOKIE_SECURE").unwrap_or(false),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_url: None,
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            dev_auth_bypass: false,
            cookie_secure: false,
        }
    }
}
