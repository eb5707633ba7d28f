//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own business logic and persistence concerns so route
//! handlers can stay focused on protocol translation and auth plumbing.
//! Board mutations flow store → [`activity`] → broadcast channel; socket
//! lifecycle and presence live in [`connection`].

pub mod activity;
pub mod board;
pub mod connection;
pub mod session;
pub mod suggest;
