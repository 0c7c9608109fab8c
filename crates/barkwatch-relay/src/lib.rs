//! Event relay between remote capture clients and a central detection
//! server, over plain TCP with length-prefixed JSON frames.
//!
//! The server owns one listening socket and tracks every connected client by
//! its wire identity (peer address). Inbound events are stamped with that
//! identity before they reach the local bus; clients that stay silent past
//! the liveness timeout are evicted and announced via
//! `ClientCleanupRequested`. Clients keep the link warm with periodic
//! heartbeats whenever they have nothing else to send.

pub mod client;
pub mod codec;
pub mod config;
pub mod registry;
pub mod server;

pub use client::{RelayClient, RelayClientHandle};
pub use codec::{encode_frame, CodecError, FrameDecoder, MAX_FRAME_BYTES};
pub use config::RelayConfig;
pub use registry::ClientRegistry;
pub use server::{RelayServer, RelayServerHandle};

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to bind relay listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to relay server at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("relay i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
