use std::error::Error;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::bytes::base_file_name;
use crate::commands::ctrl_c_token;
use crate::server::{accept_handler, handle_connection, AcceptHandler, ConnectionOutcome, Server, ServerConfig};
use crate::utils::{FileAcceptOptions, FileSendOptions, TransferDirection, TransferOptions};
use crate::TransferError;

/// Policy for a served directory.
///
/// Incoming files are stored under their base name unless `read_only` is
/// set. Requested files are granted only when they exist directly in `root`.
pub fn directory_policy(root: PathBuf, read_only: bool, buffer_size: usize) -> AcceptHandler {
    accept_handler(move |direction, file_name, metadata| {
        if let Some(metadata) = metadata {
            debug!("Metadata for {}: {}", file_name, serde_json::Value::Object(metadata.clone()));
        }
        let name = base_file_name(Path::new(file_name)).ok()?;
        match direction {
            TransferDirection::Receive if !read_only => {
                Some(TransferOptions::Accept(FileAcceptOptions::new(name, root.clone())))
            }
            TransferDirection::Send => {
                let path = root.join(&name);
                if path.is_file() {
                    Some(TransferOptions::Send(
                        FileSendOptions::new(path).with_max_buffer_size(buffer_size),
                    ))
                } else {
                    info!("Refusing request for missing file {}", name);
                    None
                }
            }
            _ => {
                info!("Refusing {:?} of {}", direction, name);
                None
            }
        }
    })
}

/// Listen on `port` and answer peers until interrupted.
///
/// Each accepted connection runs in its own task, so slow peers never hold
/// up the accept loop.
pub async fn run(
    port: u16,
    dir: &Path,
    read_only: bool,
    accept_all: bool,
    buffer_size: usize,
) -> Result<(), Box<dyn Error>> {
    if !dir.is_dir() {
        return Err(format!("Not a directory: {}", dir.display()).into());
    }

    let config = ServerConfig {
        max_buffer_size: buffer_size,
        ..ServerConfig::with_root(dir)
    };
    let handler = if accept_all {
        warn!("Accepting every request without a policy");
        None
    } else {
        Some(directory_policy(dir.to_path_buf(), read_only, buffer_size))
    };

    let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let mut server = Server::new(bind_addr, config.clone());
    server.start()?;
    println!("Server listening on {}", bind_addr);

    let config = Arc::new(config);
    let cancel = ctrl_c_token();
    loop {
        let (stream, peer) = match server.accept(&cancel).await {
            Ok(accepted) => accepted,
            Err(TransferError::Cancelled) => break,
            Err(e) => return Err(e.into()),
        };

        debug!("Spawning connection handler for {}", peer);
        let config = Arc::clone(&config);
        let handler = handler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match handle_connection(stream, &config, handler.as_ref(), &cancel).await {
                Ok(ConnectionOutcome::Sent(report)) => {
                    info!("{}: sent {} bytes", peer, report.bytes)
                }
                Ok(ConnectionOutcome::Received(outcome)) => info!(
                    "{}: received {} ({} bytes, complete: {})",
                    peer,
                    outcome.path.display(),
                    outcome.bytes,
                    outcome.complete
                ),
                Ok(outcome) => info!("{}: {:?}", peer, outcome),
                Err(e) => warn!("{}: connection failed: {}", peer, e),
            }
        });
    }

    server.stop();
    Ok(())
}
