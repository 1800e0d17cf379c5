//! Permission handshake run before any file bytes move.
//!
//! The initiator announces what it wants (send or receive), optional JSON
//! metadata and a base file name, then waits for a single grant byte. The
//! responder reads the same fields, asks its policy callback and answers.

use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransferError};
use crate::networking::{
    cancellable, read_bool, read_length_prefixed, read_string, read_wire_operation, write_bool,
    write_length_prefixed, write_operation, write_string, WireOperation,
};
use crate::utils::{Metadata, TransferDirection, TransferOptions, TransferSession};
use crate::MAX_FIELD_LEN;

/// Responder policy: `(direction, file_name, metadata)` to options, or `None` to refuse.
///
/// `direction` is the responder's own direction: `Receive` when the peer
/// offers a file, `Send` when the peer asks for one.
pub type AcceptHandler =
    Arc<dyn Fn(TransferDirection, &str, Option<&Metadata>) -> Option<TransferOptions> + Send + Sync>;

/// Wrap a closure as an [`AcceptHandler`].
pub fn accept_handler<F>(policy: F) -> AcceptHandler
where
    F: Fn(TransferDirection, &str, Option<&Metadata>) -> Option<TransferOptions> + Send + Sync + 'static,
{
    Arc::new(policy)
}

/// Initiator side: announce the request and wait for the peer's answer.
pub async fn request_permission<T>(session: &mut T, cancel: &CancellationToken) -> Result<bool>
where
    T: TransferSession,
    T::Stream: AsyncRead + AsyncWrite + Unpin,
{
    let operation = match session.core().direction() {
        TransferDirection::Invalid => {
            return Err(TransferError::InvalidState("session direction is not set".into()))
        }
        TransferDirection::Send => WireOperation::RequestSendPermission,
        TransferDirection::Receive => WireOperation::RequestReceivePermission,
    };
    if !session.has_options() {
        return Err(TransferError::InvalidState("transfer options are not resolved".into()));
    }

    let core = session.core_mut();
    let file_name = core
        .file_name()
        .map(str::to_owned)
        .ok_or_else(|| TransferError::InvalidState("file name is not set".into()))?;
    let metadata = match core.metadata() {
        Some(metadata) => Some(serde_json::to_vec(metadata).map_err(|e| {
            TransferError::InvalidState(format!("metadata cannot be serialized: {}", e))
        })?),
        None => None,
    };

    debug!("Requesting {:?} permission for {}", operation, file_name);
    let stream = core.stream_mut();
    cancellable(cancel, async {
        write_operation(stream, operation).await?;
        write_bool(stream, metadata.is_some()).await?;
        if let Some(bytes) = &metadata {
            write_length_prefixed(stream, bytes).await?;
        }
        write_string(stream, &file_name).await?;
        stream.flush().await?;
        read_bool(stream).await
    })
    .await
}

/// Responder side: read the first tag and map it to the responder's direction.
///
/// `Ok(None)` means the tag is not a permission request and the connection
/// should be dropped.
pub async fn read_operation<S>(stream: &mut S, cancel: &CancellationToken) -> Result<Option<TransferDirection>>
where
    S: AsyncRead + Unpin,
{
    let operation = cancellable(cancel, read_wire_operation(stream)).await?;
    Ok(match operation {
        Some(WireOperation::RequestSendPermission) => Some(TransferDirection::Receive),
        Some(WireOperation::RequestReceivePermission) => Some(TransferDirection::Send),
        _ => None,
    })
}

/// Responder side: read metadata and file name into the session.
///
/// Metadata that does not decode as a JSON object is dropped and the
/// handshake continues without it.
pub async fn build_session<T>(session: &mut T, cancel: &CancellationToken) -> Result<()>
where
    T: TransferSession,
    T::Stream: AsyncRead + AsyncWrite + Unpin,
{
    let core = session.core_mut();
    let (raw_metadata, file_name) = cancellable(cancel, async {
        let stream = core.stream_mut();
        let raw_metadata = if read_bool(stream).await? {
            Some(read_length_prefixed(stream, MAX_FIELD_LEN).await?)
        } else {
            None
        };
        let file_name = read_string(stream, MAX_FIELD_LEN).await?;
        Ok((raw_metadata, file_name))
    })
    .await?;

    let metadata = raw_metadata.and_then(|bytes| match serde_json::from_slice::<Metadata>(&bytes) {
        Ok(metadata) => Some(metadata),
        Err(e) => {
            warn!("Ignoring malformed metadata for {}: {}", file_name, e);
            None
        }
    });

    debug!("Peer {:?} request for {}", core.direction(), file_name);
    core.set_metadata(metadata);
    core.set_file_name(file_name);
    Ok(())
}

/// Responder side: resolve the transfer options, then write the grant byte.
///
/// Options come from the policy callback or, without one, from `defaults`.
/// They are resolved and checked before anything is written, so a peer is
/// never told "granted" for a transfer this side cannot run. On grant the
/// options are stored in the session and `Ok(true)` is returned.
///
/// Defaults that cannot be built for the peer's file name are refused with
/// `Ok(false)`. Policy options of the wrong kind, or options that fail their
/// checks, are refused on the wire and reported as `InvalidState`.
pub async fn decide_permission<T, D>(
    session: &mut T,
    handler: Option<&AcceptHandler>,
    defaults: D,
    cancel: &CancellationToken,
) -> Result<bool>
where
    T: TransferSession,
    T::Stream: AsyncWrite + Unpin,
    D: FnOnce(&str) -> Result<T::Options>,
{
    let core = session.core();
    let direction = core.direction();
    let file_name = core
        .file_name()
        .map(str::to_owned)
        .ok_or_else(|| TransferError::InvalidState("file name is not set".into()))?;

    // None: refused by the policy
    let resolved = match handler {
        None => {
            info!("No accept policy configured, applying defaults for {}", file_name);
            Some(defaults(&file_name))
        }
        Some(handler) => handler(direction, &file_name, core.metadata()).map(|options| {
            T::select_options(options).ok_or_else(|| {
                TransferError::InvalidState(format!(
                    "policy returned options that do not fit a {:?} session",
                    direction
                ))
            })
        }),
    };
    let resolved = resolved.map(|options| options.and_then(|o| T::check_options(&o).map(|_| o)));
    let granted = matches!(resolved, Some(Ok(_)));

    let stream = session.core_mut().stream_mut();
    cancellable(cancel, async {
        write_bool(stream, granted).await?;
        stream.flush().await?;
        Ok(())
    })
    .await?;

    match resolved {
        Some(Ok(options)) => {
            info!("Granted {}", file_name);
            session.set_options(options);
            Ok(true)
        }
        None => {
            info!("Refused {}", file_name);
            Ok(false)
        }
        Some(Err(e)) if handler.is_none() => {
            warn!("Refused {}: {}", file_name, e);
            Ok(false)
        }
        Some(Err(e)) => Err(e),
    }
}
