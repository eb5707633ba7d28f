//! Broadcast channel: named multicast groups over per-connection queues.
//!
//! DESIGN
//! ======
//! Every websocket connection registers one bounded `mpsc::Sender<Frame>`.
//! Groups are sets of connection ids:
//! - `board:{id}` for everyone viewing a board
//! - `publicShare:{public_id}` for anonymous viewers of a shared board
//!
//! Publishing never awaits: frames are pushed with `try_send`. A client
//! whose queue is full is evicted instead of silently skipped: its sender is
//! dropped, so the socket drains what was already queued, sees the queue
//! close, and disconnects. The client then rejoins and re-fetches, which is
//! how a gap in its event stream gets repaired. Within one connection,
//! frames arrive in publish order because each queue is FIFO and publishers
//! hold the read lock while fanning out.
//!
//! A board linked to a public id mirrors its task and column events into
//! the public group with member-only fields removed.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use frames::Frame;
use frames::events::{self, public_syscall, redact_public};
use serde_json::Value;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

// =============================================================================
// GROUPS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Group {
    Board(Uuid),
    PublicShare(String),
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Board(id) => write!(f, "board:{id}"),
            Self::PublicShare(id) => write!(f, "publicShare:{id}"),
        }
    }
}

// =============================================================================
// CHANNEL
// =============================================================================

struct Subscriber {
    /// `None` for anonymous public viewers.
    user_id: Option<Uuid>,
    tx: mpsc::Sender<Frame>,
    groups: HashSet<Group>,
    /// Set when a frame could not be queued. Nothing more is sent to the
    /// connection; it is evicted once the publisher can take the write lock.
    overflowed: AtomicBool,
}

#[derive(Default)]
struct Inner {
    subscribers: HashMap<Uuid, Subscriber>,
    groups: HashMap<Group, HashSet<Uuid>>,
    /// board id -> public id for boards currently shared.
    public_links: HashMap<Uuid, String>,
    /// Groups of evicted connections, kept until their `disconnect`.
    evicted: HashMap<Uuid, Vec<Group>>,
}

impl Inner {
    fn remove_member(&mut self, connection_id: Uuid, group: &Group) -> bool {
        let Some(members) = self.groups.get_mut(group) else {
            return false;
        };
        let removed = members.remove(&connection_id);
        if members.is_empty() {
            self.groups.remove(group);
        }
        removed
    }

    /// Queue `frame` for every member of `group`. Returns how many queues
    /// accepted it; connections whose queue was full are pushed to
    /// `overflowed`.
    fn deliver(&self, group: &Group, frame: &Frame, except: Option<Uuid>, overflowed: &mut Vec<Uuid>) -> usize {
        let Some(members) = self.groups.get(group) else {
            return 0;
        };
        let mut delivered = 0;
        for connection_id in members {
            if Some(*connection_id) == except {
                continue;
            }
            let Some(sub) = self.subscribers.get(connection_id) else {
                continue;
            };
            if sub.overflowed.load(Ordering::Acquire) {
                continue;
            }
            match sub.tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%connection_id, %group, syscall = %frame.syscall, "outbound queue full; evicting connection");
                    sub.overflowed.store(true, Ordering::Release);
                    overflowed.push(*connection_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(%connection_id, %group, syscall = %frame.syscall, "outbound queue closed; frame dropped");
                }
            }
        }
        delivered
    }

    /// Drop a connection's queue and group memberships, remembering the
    /// groups for its eventual `disconnect`.
    fn evict(&mut self, connection_id: Uuid) {
        let Some(sub) = self.subscribers.remove(&connection_id) else {
            return;
        };
        let groups: Vec<Group> = sub.groups.into_iter().collect();
        for group in &groups {
            self.remove_member(connection_id, group);
        }
        info!(%connection_id, groups = groups.len(), "connection evicted");
        self.evicted.insert(connection_id, groups);
    }
}

/// Cheap-to-clone handle; all clones share one set of groups.
#[derive(Clone, Default)]
pub struct BroadcastChannel {
    inner: Arc<RwLock<Inner>>,
}

impl BroadcastChannel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection's outbound queue.
    pub async fn connect(&self, connection_id: Uuid, user_id: Option<Uuid>, tx: mpsc::Sender<Frame>) {
        let mut inner = self.inner.write().await;
        inner.subscribers.insert(
            connection_id,
            Subscriber { user_id, tx, groups: HashSet::new(), overflowed: AtomicBool::new(false) },
        );
    }

    /// Drop a connection's queue and its group memberships. Returns the
    /// groups it was in, including those of an evicted connection.
    pub async fn disconnect(&self, connection_id: Uuid) -> Vec<Group> {
        let mut inner = self.inner.write().await;
        let Some(sub) = inner.subscribers.remove(&connection_id) else {
            return inner.evicted.remove(&connection_id).unwrap_or_default();
        };
        let groups: Vec<Group> = sub.groups.into_iter().collect();
        for group in &groups {
            inner.remove_member(connection_id, group);
        }
        groups
    }

    /// Add a connection to a group. `Some(false)` when it is already a
    /// member; `None` when the connection is unknown (closed, reaped, or
    /// evicted).
    pub async fn join(&self, connection_id: Uuid, group: Group) -> Option<bool> {
        let mut inner = self.inner.write().await;
        let sub = inner.subscribers.get_mut(&connection_id)?;
        if !sub.groups.insert(group.clone()) {
            return Some(false);
        }
        inner.groups.entry(group).or_default().insert(connection_id);
        Some(true)
    }

    pub async fn leave(&self, connection_id: Uuid, group: &Group) -> bool {
        let mut inner = self.inner.write().await;
        if let Some(sub) = inner.subscribers.get_mut(&connection_id) {
            sub.groups.remove(group);
        }
        inner.remove_member(connection_id, group)
    }

    /// Send to every member of `group`. Returns the number of queues that
    /// accepted the frame.
    pub async fn publish(&self, group: &Group, frame: &Frame) -> usize {
        self.fan_out(|inner, overflowed| inner.deliver(group, frame, None, overflowed)).await
    }

    /// Send to every member of `group` except one connection.
    pub async fn publish_except(&self, group: &Group, frame: &Frame, except: Uuid) -> usize {
        self.fan_out(|inner, overflowed| inner.deliver(group, frame, Some(except), overflowed)).await
    }

    /// Send a board event to its viewers and, when the board is shared, a
    /// redacted mirror to its public viewers.
    pub async fn publish_board_event(&self, board_id: Uuid, frame: &Frame) -> usize {
        self.fan_out(|inner, overflowed| {
            let mut delivered = inner.deliver(&Group::Board(board_id), frame, None, overflowed);
            if let (Some(public_id), Some(syscall)) =
                (inner.public_links.get(&board_id), public_syscall(&frame.syscall))
            {
                let mirror = public_mirror(frame, syscall);
                delivered += inner.deliver(&Group::PublicShare(public_id.clone()), &mirror, None, overflowed);
            }
            delivered
        })
        .await
    }

    /// Deliver under the read lock, then evict whoever overflowed.
    async fn fan_out(&self, send: impl FnOnce(&Inner, &mut Vec<Uuid>) -> usize) -> usize {
        let mut overflowed = Vec::new();
        let delivered = send(&*self.inner.read().await, &mut overflowed);
        if !overflowed.is_empty() {
            let mut inner = self.inner.write().await;
            for connection_id in overflowed {
                inner.evict(connection_id);
            }
        }
        delivered
    }

    /// True when another connection of `user_id` is still in `group`.
    pub async fn user_in_group(&self, user_id: Uuid, group: &Group, except: Uuid) -> bool {
        let inner = self.inner.read().await;
        inner.groups.get(group).is_some_and(|members| {
            members
                .iter()
                .filter(|id| **id != except)
                .any(|id| inner.subscribers.get(id).and_then(|s| s.user_id) == Some(user_id))
        })
    }

    /// Link a board to a public id so its events are mirrored.
    pub async fn share(&self, board_id: Uuid, public_id: &str) {
        let mut inner = self.inner.write().await;
        inner.public_links.insert(board_id, public_id.to_owned());
        info!(%board_id, %public_id, "public share linked");
    }

    /// Unlink a board's public id, notify its public viewers, and empty the
    /// public group. Returns the number of viewers notified.
    pub async fn unshare(&self, board_id: Uuid) -> usize {
        let mut inner = self.inner.write().await;
        let Some(public_id) = inner.public_links.remove(&board_id) else {
            return 0;
        };
        let group = Group::PublicShare(public_id.clone());
        let revoked = Frame::request(events::PUBLIC_REVOKED, frames::Data::new()).with_data("public_id", public_id.clone());
        let mut overflowed = Vec::new();
        let notified = inner.deliver(&group, &revoked, None, &mut overflowed);
        for connection_id in overflowed {
            inner.evict(connection_id);
        }
        if let Some(members) = inner.groups.remove(&group) {
            for connection_id in members {
                if let Some(sub) = inner.subscribers.get_mut(&connection_id) {
                    sub.groups.remove(&group);
                }
            }
        }
        info!(%board_id, %public_id, notified, "public share revoked");
        notified
    }

    /// Public id currently linked to a board.
    pub async fn public_link(&self, board_id: Uuid) -> Option<String> {
        self.inner.read().await.public_links.get(&board_id).cloned()
    }

    /// Number of connections in a group.
    pub async fn group_size(&self, group: &Group) -> usize {
        self.inner.read().await.groups.get(group).map_or(0, HashSet::len)
    }
}

fn public_mirror(frame: &Frame, syscall: String) -> Frame {
    let mut data = Value::Object(frame.data.clone().into_iter().collect());
    redact_public(&mut data);
    let data = match data {
        Value::Object(map) => map.into_iter().collect(),
        _ => frames::Data::new(),
    };
    // Mirrors carry no board id; public viewers address boards by public id.
    Frame { board_id: None, from: None, syscall, data, ..frame.clone() }
}

#[cfg(test)]
#[path = "channel_test.rs"]
mod tests;
