//! Line-oriented TCP relay: lets another process feed messages into the
//! pipeline and drive read/delete state.

mod client;
mod protocol;
mod server;

pub use client::{Completion, RelayClient, RelayOutbox};
pub use protocol::{DecodeError, ErrorCode, RELAY_HINT, RelayReply, RelayRequest};
pub use server::{RelayServer, RelayServerConfig, RelayStats, dispatch};
