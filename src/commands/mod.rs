//! # Commands Module
//!
//! This module contains the three command handlers for peerftp:
//!
//! ## `send`
//! Offers a local file to a peer:
//! - Connects to the peer's listening address
//! - Sends the permission request with optional metadata
//! - Streams the file in segments once the peer accepts
//!
//! ## `request`
//! Asks a peer for one of its files:
//! - Connects to the peer and names the wanted file
//! - Stores the incoming segments in the output directory
//! - Reports whether the transfer finished or was cut short
//!
//! ## `serve`
//! Listens for peers and answers their requests:
//! - Accepts connections in a loop, one task per connection
//! - Decides each request with a directory-based policy
//! - Serves files from, and stores files into, one directory

pub mod request;
pub mod send;
pub mod serve;

use tokio_util::sync::CancellationToken;

/// Token cancelled on Ctrl-C so in-flight transfers unwind and release their handles.
pub fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Interrupted, cancelling transfer");
            trigger.cancel();
        }
    });
    token
}
