use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use log::{debug, info};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::bytes::base_file_name;
use crate::error::{Result, TransferError};
use crate::handshake::{build_session, decide_permission, read_operation};
use crate::networking::cancellable;
use crate::transfer::{receive_file, send_file, ReceiveOutcome, SendReport};
use crate::utils::{FileAcceptOptions, FileSendOptions, ReceivingSession, SendingSession, TransferDirection};
use crate::{DEFAULT_BACKLOG, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_QUEUE_CAPACITY};

pub use crate::handshake::{accept_handler, AcceptHandler};

/// Defaults applied when a request is granted without explicit options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Directory files are served from and stored into.
    pub root_directory: PathBuf,
    pub max_buffer_size: usize,
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            root_directory: PathBuf::from("."),
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ServerConfig {
    pub fn with_root(root_directory: impl Into<PathBuf>) -> Self {
        ServerConfig {
            root_directory: root_directory.into(),
            ..ServerConfig::default()
        }
    }

    /// Serve `root_directory/<base name>`; only regular files are offered.
    fn default_send_options(&self, file_name: &str) -> Result<FileSendOptions> {
        let name = base_file_name(Path::new(file_name))?;
        let path = self.root_directory.join(name);
        if !path.is_file() {
            return Err(TransferError::InvalidState(format!(
                "{} is not a file",
                path.display()
            )));
        }
        Ok(FileSendOptions::new(path)
            .with_max_buffer_size(self.max_buffer_size)
            .with_queue_capacity(self.queue_capacity))
    }

    fn default_accept_options(&self, file_name: &str) -> Result<FileAcceptOptions> {
        let options = FileAcceptOptions::new(file_name, self.root_directory.clone());
        options.destination()?;
        Ok(options)
    }
}

/// What happened on one accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The first message was not a permission request.
    Dropped,
    Denied,
    Sent(SendReport),
    Received(ReceiveOutcome),
}

/// Responding side: listens and plays the role complementary to each initiator.
#[derive(Debug)]
pub struct Server {
    local_addr: SocketAddr,
    config: ServerConfig,
    listener: Option<TcpListener>,
}

impl Server {
    pub fn new(local_addr: SocketAddr, config: ServerConfig) -> Self {
        Server {
            local_addr,
            config,
            listener: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind and listen. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        self.start_with_backlog(DEFAULT_BACKLOG)
    }

    pub fn start_with_backlog(&mut self, backlog: u32) -> Result<()> {
        let socket = match self.local_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(self.local_addr)?;
        let listener = socket.listen(backlog)?;
        info!("Server listening on {}", listener.local_addr()?);
        self.listener = Some(listener);
        Ok(())
    }

    /// Close the listening socket. Connections already accepted keep running.
    pub fn stop(&mut self) {
        if self.listener.take().is_some() {
            info!("Server on {} stopped", self.local_addr);
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Bound address, which differs from the configured one when port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Wait for the next pending connection.
    pub async fn accept(&self, cancel: &CancellationToken) -> Result<(TcpStream, SocketAddr)> {
        let listener = self
            .listener
            .as_ref()
            .ok_or_else(|| TransferError::InvalidState("server is not started".into()))?;
        let (stream, peer) =
            cancellable(cancel, async { listener.accept().await.map_err(TransferError::from) })
                .await?;
        stream.set_nodelay(true)?;
        info!("New connection from: {}", peer);
        Ok((stream, peer))
    }

    /// Accept one connection and run it to completion.
    pub async fn accept_connection(
        &self,
        handler: Option<&AcceptHandler>,
        cancel: &CancellationToken,
    ) -> Result<ConnectionOutcome> {
        let (stream, _peer) = self.accept(cancel).await?;
        handle_connection(stream, &self.config, handler, cancel).await
    }
}

/// Run the responder side of one connection.
///
/// The initiator's first message decides the roles: a send request makes
/// this side the receiver and a receive request makes it the sender.
pub async fn handle_connection<S>(
    mut stream: S,
    config: &ServerConfig,
    handler: Option<&AcceptHandler>,
    cancel: &CancellationToken,
) -> Result<ConnectionOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let direction = match read_operation(&mut stream, cancel).await? {
        Some(direction) => direction,
        None => {
            debug!("First message is not a permission request, dropping connection");
            return Ok(ConnectionOutcome::Dropped);
        }
    };

    match direction {
        TransferDirection::Send => {
            let mut session = SendingSession::new(stream);
            build_session(&mut session, cancel).await?;
            let defaults = |name: &str| config.default_send_options(name);
            if !decide_permission(&mut session, handler, defaults, cancel).await? {
                return Ok(ConnectionOutcome::Denied);
            }
            let report = send_file(&mut session, cancel).await?;
            Ok(ConnectionOutcome::Sent(report))
        }
        TransferDirection::Receive => {
            let mut session = ReceivingSession::new(stream);
            build_session(&mut session, cancel).await?;
            let defaults = |name: &str| config.default_accept_options(name);
            if !decide_permission(&mut session, handler, defaults, cancel).await? {
                return Ok(ConnectionOutcome::Denied);
            }
            let outcome = receive_file(&mut session, cancel).await?;
            Ok(ConnectionOutcome::Received(outcome))
        }
        TransferDirection::Invalid => Ok(ConnectionOutcome::Dropped),
    }
}
