//! Client state models.
//!
//! SYSTEM CONTEXT
//! ==============
//! `board` is the local projection of one joined board; `moves` is the
//! optimistic move tracker that edits it ahead of the server.

pub mod board;
pub mod moves;
