//! Session and WS-ticket management.
//!
//! ARCHITECTURE
//! ============
//! HTTP auth uses long-lived session tokens, while websocket upgrades use
//! one-time short-lived tickets so tokens never appear in WS query params.
//!
//! TRADE-OFFS
//! ==========
//! Ticket consumption is destructive to guarantee single use; this favors
//! replay safety over reconnect convenience. A reconnecting client asks
//! for a fresh ticket.

use std::fmt::Write;

use frames::now_ms;
use rand::Rng;
use uuid::Uuid;

use crate::store::{BoardStore, StoreError, User};

pub const SESSION_TTL_MS: i64 = 30 * 24 * 60 * 60 * 1000;
pub const WS_TICKET_TTL_MS: i64 = 60 * 1000;

pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

/// Generate a cryptographically random 32-byte hex token.
#[must_use]
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Generate a short-lived 16-byte hex WS ticket.
#[must_use]
pub(crate) fn generate_ws_ticket() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes_to_hex(&bytes)
}

/// Create a session for the given user, returning the token.
///
/// # Errors
///
/// Propagates store failures.
pub async fn create_session(store: &dyn BoardStore, user_id: Uuid) -> Result<String, StoreError> {
    let token = generate_token();
    store
        .create_session(&token, user_id, now_ms() + SESSION_TTL_MS)
        .await?;
    Ok(token)
}

/// Validate a session token and return the associated user.
///
/// # Errors
///
/// Propagates store failures.
pub async fn validate_session(store: &dyn BoardStore, token: &str) -> Result<Option<User>, StoreError> {
    store.session_user(token, now_ms()).await
}

/// Delete a session by token.
///
/// # Errors
///
/// Propagates store failures.
pub async fn delete_session(store: &dyn BoardStore, token: &str) -> Result<(), StoreError> {
    store.delete_session(token).await
}

/// Create a short-lived WS ticket for the given user.
///
/// # Errors
///
/// Propagates store failures.
pub async fn create_ws_ticket(store: &dyn BoardStore, user_id: Uuid) -> Result<String, StoreError> {
    let ticket = generate_ws_ticket();
    store
        .create_ws_ticket(&ticket, user_id, now_ms() + WS_TICKET_TTL_MS)
        .await?;
    Ok(ticket)
}

/// Consume a WS ticket, returning the `user_id` if it was valid.
///
/// # Errors
///
/// Propagates store failures.
pub async fn consume_ws_ticket(store: &dyn BoardStore, ticket: &str) -> Result<Option<Uuid>, StoreError> {
    store.consume_ws_ticket(ticket, now_ms()).await
}

/// Find a user by e-mail or create one, then open a session for them.
/// Backs the development bootstrap endpoint.
///
/// # Errors
///
/// Propagates store failures.
pub async fn bootstrap_session(
    store: &dyn BoardStore,
    name: &str,
    email: &str,
) -> Result<(User, String), StoreError> {
    let user = match store.find_user_by_email(email).await? {
        Some(user) => user,
        None => {
            let user = User {
                id: Uuid::new_v4(),
                name: name.trim().to_string(),
                email: Some(email.trim().to_string()),
                avatar_url: None,
            };
            store.upsert_user(&user).await?;
            user
        }
    };
    let token = create_session(store, user.id).await?;
    Ok((user, token))
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
