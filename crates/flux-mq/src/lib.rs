//! A brokerless, in-process/inter-thread message-passing substrate: lock-free
//! batched pipes, a cross-thread command bus, and the REP socket-pattern
//! state machine built on top of them.
//!
//! Scope is deliberately narrow (see `DESIGN.md`): no network transports, no
//! wire framing, no C API. Everything here runs within one process, wiring
//! together application threads that each own a disjoint set of sockets and
//! pipe endpoints.

pub mod app_thread;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod pipe;
pub mod signaler;
pub mod socket;
pub mod types;

pub use app_thread::AppThread;
pub use dispatcher::Dispatcher;
pub use error::{RecvError, SendError, SocketOptionError};
pub use message::Msg;
pub use socket::RepSocket;
pub use types::{SocketType, ThreadFlags};
