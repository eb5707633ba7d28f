//! Client-side board sync: the local projection of a joined board and the
//! optimistic move state machine that keeps it honest.
//!
//! ARCHITECTURE
//! ============
//! - [`net::events`] turns raw frames into typed [`net::events::ServerEvent`]s.
//! - [`state::board`] holds the local view (columns, tasks, viewers, feed).
//! - [`state::moves`] tracks optimistic moves until the server settles them.
//! - [`sync`] routes events into both and collects user-facing errors.
//!
//! The crate has no transport of its own. The embedding UI owns the socket
//! and the HTTP client, feeds inbound frames to [`sync::BoardSync`], and sends
//! the requests it hands back.

pub mod error;
pub mod net;
pub mod state;
pub mod sync;

pub use error::ClientError;

#[cfg(test)]
mod test_support;
