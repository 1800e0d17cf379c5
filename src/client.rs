use std::net::SocketAddr;

use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransferError};
use crate::handshake::request_permission;
use crate::networking::{cancellable, open_connection};
use crate::transfer::{receive_file, send_file, ReceiveOutcome, SendReport};
use crate::utils::{FileAcceptOptions, FileSendOptions, Metadata, ReceivingSession, SendingSession};

/// Initiating side of a transfer.
///
/// `connect` only records the peer address; every operation opens its own
/// connection and closes it when the transfer ends.
#[derive(Debug, Default, Clone)]
pub struct Client {
    endpoint: Option<SocketAddr>,
}

impl Client {
    pub fn new() -> Self {
        Client::default()
    }

    pub fn connect(&mut self, endpoint: SocketAddr) {
        debug!("Client endpoint set to {}", endpoint);
        self.endpoint = Some(endpoint);
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    /// Offer a local file to the peer and stream it once accepted.
    pub async fn send_file(
        &self,
        options: FileSendOptions,
        metadata: Option<Metadata>,
        cancel: &CancellationToken,
    ) -> Result<SendReport> {
        let endpoint = self.endpoint.ok_or(TransferError::NotConnected)?;
        options.validate()?;

        let stream = cancellable(cancel, open_connection(endpoint)).await?;
        let mut session = SendingSession::outgoing(stream, options, metadata)?;

        if !request_permission(&mut session, cancel).await? {
            info!("Peer refused {:?}", session.session.file_name());
            return Err(TransferError::PermissionDenied);
        }
        send_file(&mut session, cancel).await
    }

    /// Ask the peer for a file and store it locally.
    ///
    /// `options_provider` runs before anything is sent; its `file_name` is the
    /// name requested from the peer.
    pub async fn request_file<F>(
        &self,
        options_provider: F,
        metadata: Option<Metadata>,
        cancel: &CancellationToken,
    ) -> Result<ReceiveOutcome>
    where
        F: FnOnce() -> FileAcceptOptions,
    {
        let endpoint = self.endpoint.ok_or(TransferError::NotConnected)?;

        let stream = cancellable(cancel, open_connection(endpoint)).await?;
        let options = options_provider();
        let mut session = ReceivingSession::outgoing(stream, options, metadata)?;

        if !request_permission(&mut session, cancel).await? {
            info!("Peer refused to send {:?}", session.session.file_name());
            return Err(TransferError::PermissionDenied);
        }
        receive_file(&mut session, cancel).await
    }
}
