//! Socket patterns: the shared round-robin pipe-set (spec §5 "Socket base")
//! and the concrete patterns built on top of it. Only REP has a full state
//! machine in this crate (spec §1 scope); [`crate::types::SocketType`]
//! carries the other pattern codes for session/attach code outside this
//! crate's scope to dispatch on.

mod base;
mod rep;

pub use rep::RepSocket;
