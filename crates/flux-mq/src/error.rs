//! Error kinds surfaced to callers (spec §6 "Error codes", §7).

use thiserror::Error;

/// Errors from `xsend`. Maps to `EFSM` / `EAGAIN` at the external boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("send would block: no credit on the reply pipe")]
    WouldBlock,
    #[error("send attempted outside the replying phase")]
    Fsm,
}

/// Errors from `xrecv`. Maps to `EFSM` / `EAGAIN` at the external boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    #[error("recv would block: no peer has a visible frame")]
    WouldBlock,
    #[error("recv attempted while a reply is pending")]
    Fsm,
}

/// `EINVAL` — unsupported socket type, or an option set on a pattern that
/// doesn't expose one.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SocketOptionError {
    #[error("invalid argument")]
    Invalid,
}
