//! Presence registry: who is connected, and who is viewing which board.
//!
//! DESIGN
//! ======
//! Three maps behind one mutex:
//! - connection id → owning user + last heartbeat
//! - user id → live connection ids
//! - board id → join-ordered viewer snapshots (one per user)
//!
//! A user stays in a board's viewer set until they leave it or their last
//! live connection goes away. Online/offline is derived at read time from
//! the newest heartbeat across the user's connections, so a viewer whose
//! sockets are all stale shows as offline until the reaper removes them.
//!
//! Every operation is synchronous and takes `now` explicitly. Absence is
//! never an error: unknown connections, users, or boards yield `None`,
//! `false`, or an empty list.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use frames::events::{PresenceStatus, UserPresence};
use uuid::Uuid;

use crate::config::env_parse;

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_PRESENCE_TIMEOUT_MS: u64 = 45_000;

// =============================================================================
// CONFIG
// =============================================================================

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("presence timeout ({timeout_ms}ms) must exceed heartbeat interval ({interval_ms}ms)")]
pub struct PresenceConfigError {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceConfig {
    heartbeat_interval_ms: u64,
    presence_timeout_ms: u64,
}

impl PresenceConfig {
    /// # Errors
    ///
    /// Rejects a timeout that does not exceed the heartbeat interval; with
    /// such settings a healthy client would be reaped between heartbeats.
    pub fn new(heartbeat_interval_ms: u64, presence_timeout_ms: u64) -> Result<Self, PresenceConfigError> {
        if heartbeat_interval_ms == 0 || presence_timeout_ms <= heartbeat_interval_ms {
            return Err(PresenceConfigError { interval_ms: heartbeat_interval_ms, timeout_ms: presence_timeout_ms });
        }
        Ok(Self { heartbeat_interval_ms, presence_timeout_ms })
    }

    /// Read `HEARTBEAT_INTERVAL_MS` and `PRESENCE_TIMEOUT_MS`.
    ///
    /// # Errors
    ///
    /// See [`PresenceConfig::new`].
    pub fn from_env() -> Result<Self, PresenceConfigError> {
        Self::new(
            env_parse("HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL_MS),
            env_parse("PRESENCE_TIMEOUT_MS", DEFAULT_PRESENCE_TIMEOUT_MS),
        )
    }

    #[must_use]
    pub fn heartbeat_interval_ms(&self) -> u64 {
        self.heartbeat_interval_ms
    }

    #[must_use]
    pub fn presence_timeout_ms(&self) -> u64 {
        self.presence_timeout_ms
    }

    fn timeout(&self) -> i64 {
        i64::try_from(self.presence_timeout_ms).unwrap_or(i64::MAX)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS, presence_timeout_ms: DEFAULT_PRESENCE_TIMEOUT_MS }
    }
}

// =============================================================================
// TYPES
// =============================================================================

/// Profile fields shown to other viewers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone)]
struct Connection {
    identity: Identity,
    last_heartbeat: i64,
    authenticated_at: i64,
}

#[derive(Debug, Clone)]
struct Viewer {
    identity: Identity,
    joined_at: i64,
}

/// Result of removing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unregistered {
    pub user_id: Uuid,
    /// True when this was the user's last live connection.
    pub went_offline: bool,
    /// Boards the user was removed from as a consequence.
    pub vacated_boards: Vec<Uuid>,
}

/// A connection removed by [`PresenceRegistry::reap_expired`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaped {
    pub connection_id: Uuid,
    pub user_id: Uuid,
    /// How long the connection had been authenticated, in ms.
    pub connected_for_ms: i64,
    pub vacated_boards: Vec<Uuid>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<Uuid, Connection>,
    user_connections: HashMap<Uuid, HashSet<Uuid>>,
    boards: HashMap<Uuid, Vec<Viewer>>,
}

impl Inner {
    fn latest_heartbeat(&self, user_id: Uuid) -> Option<i64> {
        self.user_connections
            .get(&user_id)?
            .iter()
            .filter_map(|conn| self.connections.get(conn))
            .map(|c| c.last_heartbeat)
            .max()
    }

    fn presence_of(&self, identity: &Identity, fallback_seen: i64, now: i64, timeout: i64) -> UserPresence {
        let latest = self.latest_heartbeat(identity.user_id);
        let status = match latest {
            Some(ts) if now - ts < timeout => PresenceStatus::Online,
            _ => PresenceStatus::Offline,
        };
        UserPresence {
            user_id: identity.user_id,
            name: identity.name.clone(),
            avatar_url: identity.avatar_url.clone(),
            status,
            last_seen: latest.unwrap_or(fallback_seen),
        }
    }

    fn add_viewer(&mut self, board_id: Uuid, identity: &Identity, now: i64) -> bool {
        let viewers = self.boards.entry(board_id).or_default();
        if let Some(existing) = viewers
            .iter_mut()
            .find(|v| v.identity.user_id == identity.user_id)
        {
            existing.identity = identity.clone();
            return false;
        }
        viewers.push(Viewer { identity: identity.clone(), joined_at: now });
        true
    }

    fn remove_viewer(&mut self, board_id: Uuid, user_id: Uuid) -> bool {
        let Some(viewers) = self.boards.get_mut(&board_id) else {
            return false;
        };
        let before = viewers.len();
        viewers.retain(|v| v.identity.user_id != user_id);
        let removed = viewers.len() != before;
        if viewers.is_empty() {
            self.boards.remove(&board_id);
        }
        removed
    }

    fn remove_connection(&mut self, connection_id: Uuid) -> Option<Unregistered> {
        let conn = self.connections.remove(&connection_id)?;
        let user_id = conn.identity.user_id;

        let went_offline = match self.user_connections.get_mut(&user_id) {
            Some(set) => {
                set.remove(&connection_id);
                set.is_empty()
            }
            None => true,
        };
        if !went_offline {
            return Some(Unregistered { user_id, went_offline, vacated_boards: Vec::new() });
        }

        self.user_connections.remove(&user_id);
        let mut vacated: Vec<Uuid> = self
            .boards
            .iter()
            .filter(|(_, viewers)| viewers.iter().any(|v| v.identity.user_id == user_id))
            .map(|(board_id, _)| *board_id)
            .collect();
        vacated.sort_unstable();
        for board_id in &vacated {
            self.remove_viewer(*board_id, user_id);
        }
        Some(Unregistered { user_id, went_offline, vacated_boards: vacated })
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Cheap-to-clone handle; all clones share one set of maps.
#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<Inner>>,
    config: PresenceConfig,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new(config: PresenceConfig) -> Self {
        Self { inner: Arc::new(Mutex::new(Inner::default())), config }
    }

    #[must_use]
    pub fn config(&self) -> PresenceConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a new authenticated connection. Re-registering an existing id
    /// moves it to the new identity.
    pub fn register_connection(&self, connection_id: Uuid, identity: &Identity, now: i64) -> UserPresence {
        let mut inner = self.lock();
        if inner.connections.contains_key(&connection_id) {
            inner.remove_connection(connection_id);
        }
        inner.connections.insert(
            connection_id,
            Connection { identity: identity.clone(), last_heartbeat: now, authenticated_at: now },
        );
        inner
            .user_connections
            .entry(identity.user_id)
            .or_default()
            .insert(connection_id);
        inner.presence_of(identity, now, now, self.config.timeout())
    }

    /// Refresh a connection's liveness. `None` for unknown connections.
    pub fn heartbeat(&self, connection_id: Uuid, now: i64) -> Option<UserPresence> {
        let mut inner = self.lock();
        let conn = inner.connections.get_mut(&connection_id)?;
        conn.last_heartbeat = conn.last_heartbeat.max(now);
        let identity = conn.identity.clone();
        Some(inner.presence_of(&identity, now, now, self.config.timeout()))
    }

    /// Remove a connection. When it was the user's last, the user leaves
    /// every board they were viewing.
    pub fn unregister_connection(&self, connection_id: Uuid) -> Option<Unregistered> {
        self.lock().remove_connection(connection_id)
    }

    /// Add a viewer. Returns `true` when the user was not already viewing;
    /// a repeat join only refreshes the stored profile.
    pub fn join_board(&self, board_id: Uuid, identity: &Identity, now: i64) -> bool {
        self.lock().add_viewer(board_id, identity, now)
    }

    /// [`join_board`](Self::join_board) on behalf of a live connection.
    /// `None`, with nothing recorded, when the connection is not registered
    /// (closed or already reaped); otherwise the reaper would never find the
    /// viewer.
    pub fn join_board_via(&self, connection_id: Uuid, board_id: Uuid, identity: &Identity, now: i64) -> Option<bool> {
        let mut inner = self.lock();
        let owner = inner.connections.get(&connection_id)?.identity.user_id;
        if owner != identity.user_id {
            return None;
        }
        Some(inner.add_viewer(board_id, identity, now))
    }

    /// Remove a viewer; the board entry disappears with its last viewer.
    pub fn leave_board(&self, board_id: Uuid, user_id: Uuid) -> bool {
        self.lock().remove_viewer(board_id, user_id)
    }

    /// Join-ordered snapshot of a board's viewers.
    #[must_use]
    pub fn board_viewers(&self, board_id: Uuid, now: i64) -> Vec<UserPresence> {
        let inner = self.lock();
        let Some(viewers) = inner.boards.get(&board_id) else {
            return Vec::new();
        };
        viewers
            .iter()
            .map(|v| inner.presence_of(&v.identity, v.joined_at, now, self.config.timeout()))
            .collect()
    }

    #[must_use]
    pub fn is_viewing(&self, board_id: Uuid, user_id: Uuid) -> bool {
        self.lock()
            .boards
            .get(&board_id)
            .is_some_and(|viewers| viewers.iter().any(|v| v.identity.user_id == user_id))
    }

    /// Boards a user is currently viewing, sorted.
    #[must_use]
    pub fn boards_for_user(&self, user_id: Uuid) -> Vec<Uuid> {
        let inner = self.lock();
        let mut boards: Vec<Uuid> = inner
            .boards
            .iter()
            .filter(|(_, viewers)| viewers.iter().any(|v| v.identity.user_id == user_id))
            .map(|(board_id, _)| *board_id)
            .collect();
        boards.sort_unstable();
        boards
    }

    /// Unregister every connection silent for at least the presence timeout.
    pub fn reap_expired(&self, now: i64) -> Vec<Reaped> {
        let mut inner = self.lock();
        let timeout = self.config.timeout();
        let mut expired: Vec<Uuid> = inner
            .connections
            .iter()
            .filter(|(_, c)| now - c.last_heartbeat >= timeout)
            .map(|(id, _)| *id)
            .collect();
        expired.sort_unstable();

        expired
            .into_iter()
            .filter_map(|connection_id| {
                let connected_for_ms = inner
                    .connections
                    .get(&connection_id)
                    .map_or(0, |c| now - c.authenticated_at);
                inner.remove_connection(connection_id).map(|u| Reaped {
                    connection_id,
                    user_id: u.user_id,
                    connected_for_ms,
                    vacated_boards: u.vacated_boards,
                })
            })
            .collect()
    }

    /// Rewrite a user's connection and viewer snapshots after a profile
    /// change. Returns the boards whose viewer list changed.
    pub fn refresh_profile(&self, identity: &Identity) -> Vec<Uuid> {
        let mut inner = self.lock();
        for conn in inner.connections.values_mut() {
            if conn.identity.user_id == identity.user_id {
                conn.identity = identity.clone();
            }
        }
        let mut changed: Vec<Uuid> = Vec::new();
        for (board_id, viewers) in &mut inner.boards {
            for viewer in viewers.iter_mut() {
                if viewer.identity.user_id == identity.user_id && viewer.identity != *identity {
                    viewer.identity = identity.clone();
                    changed.push(*board_id);
                }
            }
        }
        changed.sort_unstable();
        changed
    }

    /// Current presence of a user with at least one live connection.
    #[must_use]
    pub fn user_presence(&self, user_id: Uuid, now: i64) -> Option<UserPresence> {
        let inner = self.lock();
        let identity = inner
            .user_connections
            .get(&user_id)?
            .iter()
            .find_map(|conn| inner.connections.get(conn))
            .map(|c| c.identity.clone())?;
        Some(inner.presence_of(&identity, now, now, self.config.timeout()))
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    /// Number of boards with at least one viewer.
    #[must_use]
    pub fn tracked_board_count(&self) -> usize {
        self.lock().boards.len()
    }
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
