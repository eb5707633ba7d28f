//! Networking-facing types for the websocket frame protocol.
//!
//! SYSTEM CONTEXT
//! ==============
//! `events` decodes server frames into typed events. Sockets and HTTP
//! belong to the embedding application.

pub mod events;
