//! shellgate - an HTTP gateway in front of a remote session manager.
//!
//! Fans commands out to many sessions at once and relays interactive shell
//! I/O over plain request/response HTTP, using a cursor into the upstream's
//! append-only output buffer in place of a socket.

pub mod api;
pub mod bulk;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod shell;
pub mod upstream;
