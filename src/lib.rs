//! Peer-to-peer file transfer over raw TCP streams.
//!
//! Either peer may ask to send a file to the other or to receive one from it.
//! Every transfer starts with a permission handshake; on grant the file is
//! streamed as framed segments terminated by an end-of-transfer marker.

pub mod bytes;
pub mod client;
pub mod commands;
pub mod error;
pub mod handshake;
pub mod networking;
pub mod server;
pub mod transfer;
pub mod utils;

pub use client::Client;
pub use error::{Result, TransferError};
pub use server::{accept_handler, handle_connection, AcceptHandler, ConnectionOutcome, Server, ServerConfig};
pub use transfer::{ReceiveOutcome, SendReport};
pub use utils::{
    FileAcceptOptions, FileSendOptions, Metadata, ReceivingSession, SendingSession, Session,
    TransferDirection, TransferOptions,
};

/// Largest segment a sender produces unless configured otherwise (1 MiB).
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;
/// Segments buffered between the disk reader and the network writer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
/// Upper bound for length-prefixed handshake fields (file name, metadata).
pub const MAX_FIELD_LEN: u32 = 16 * 1024 * 1024;
/// Upper bound a receiver accepts for a single segment.
pub const MAX_SEGMENT_LEN: u32 = 64 * 1024 * 1024;

pub const DEFAULT_PORT: u16 = 7070;
pub const DEFAULT_BACKLOG: u32 = 1024;
