//! Segmented file transfer once permission has been granted.
//!
//! Sending runs two stages over one bounded queue: a spawned reader that
//! chunks the source file, and the connection task that frames each chunk
//! onto the stream. Receiving is a single loop appending segments to the
//! destination file until the end-of-transfer marker arrives.

use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::bytes::{create_output_file, open_source_file, read_segment};
use crate::error::{Result, TransferError};
use crate::networking::{
    cancellable, read_length_prefixed, read_wire_operation, write_length_prefixed, write_operation,
    WireOperation,
};
use crate::utils::{ReceivingSession, SendingSession};
use crate::MAX_SEGMENT_LEN;

/// Items flowing from the file reader to the network writer.
type SegmentResult = io::Result<Vec<u8>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendReport {
    pub segments: u64,
    pub bytes: u64,
}

/// Result of a receive. `complete` is false when the stream failed before
/// the end-of-transfer marker; the partial file is left at `path`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveOutcome {
    pub path: PathBuf,
    pub segments: u64,
    pub bytes: u64,
    pub complete: bool,
}

/// Stream the session's source file to the peer.
pub async fn send_file<S>(session: &mut SendingSession<S>, cancel: &CancellationToken) -> Result<SendReport>
where
    S: AsyncWrite + Unpin,
{
    let options = session
        .options
        .clone()
        .ok_or_else(|| TransferError::InvalidState("send options are not resolved".into()))?;
    options.validate()?;

    let (tx, rx) = mpsc::channel::<SegmentResult>(options.queue_capacity);
    let reader_cancel = cancel.child_token();

    debug!("Spawning segment reader for {}", options.file_path.display());
    let reader_handle = tokio::spawn(read_segments_task(
        options.file_path.clone(),
        options.max_buffer_size,
        tx,
        reader_cancel.clone(),
    ));

    let report = send_segments_task(
        session.session.stream_mut(),
        rx,
        reader_handle,
        reader_cancel,
        cancel,
    )
    .await?;

    info!(
        "Sent {} in {} segments ({} bytes)",
        options.file_path.display(),
        report.segments,
        report.bytes
    );
    Ok(report)
}

/// Read the source file in pieces of at most `max_len` bytes and queue them in order.
///
/// Dropping `tx` on return closes the queue. Read failures are queued as
/// errors so the writer never mistakes them for the end of the file.
async fn read_segments_task(
    path: PathBuf,
    max_len: usize,
    tx: mpsc::Sender<SegmentResult>,
    cancel: CancellationToken,
) {
    let (mut file, mut remaining) = match open_source_file(&path).await {
        Ok(opened) => opened,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            return;
        }
    };

    let mut segment_index: u64 = 0;
    while remaining > 0 {
        let want = remaining.min(max_len as u64) as usize;
        let segment = tokio::select! {
            _ = cancel.cancelled() => return,
            segment = read_segment(&mut file, want) => segment,
        };
        let segment = match segment {
            Ok(segment) if segment.is_empty() => {
                debug!("Source ended early with {} bytes unread", remaining);
                break;
            }
            Ok(segment) => segment,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };

        remaining -= segment.len() as u64;
        debug!("Read segment {}: {} bytes", segment_index, segment.len());
        let queued = tokio::select! {
            _ = cancel.cancelled() => return,
            queued = tx.send(Ok(segment)) => queued,
        };
        if queued.is_err() {
            debug!("Segment queue closed by writer after {} segments", segment_index);
            return;
        }
        segment_index += 1;
    }
    debug!("Finished reading all segments, total: {}", segment_index);
}

/// Frame queued segments onto the stream, then write the end-of-transfer marker.
///
/// The marker is written only once the reader has been joined without error;
/// a reader that panicked closes the queue just like one that finished.
async fn send_segments_task<W>(
    stream: &mut W,
    mut rx: mpsc::Receiver<SegmentResult>,
    reader: JoinHandle<()>,
    reader_cancel: CancellationToken,
    cancel: &CancellationToken,
) -> Result<SendReport>
where
    W: AsyncWrite + Unpin,
{
    // If the writer fails first, stop the reader and report the writer's error
    let framed = write_segments(stream, &mut rx, cancel).await;
    if framed.is_err() {
        reader_cancel.cancel();
    }
    drop(rx);
    let joined = reader.await;

    let report = framed?;
    joined.map_err(|e| TransferError::TaskFailed(e.to_string()))?;

    cancellable(cancel, async {
        write_operation(stream, WireOperation::EndOfTransfer).await?;
        stream.flush().await?;
        Ok(())
    })
    .await?;
    debug!("Sent {} segments total", report.segments);
    Ok(report)
}

async fn write_segments<W>(
    stream: &mut W,
    rx: &mut mpsc::Receiver<SegmentResult>,
    cancel: &CancellationToken,
) -> Result<SendReport>
where
    W: AsyncWrite + Unpin,
{
    let mut report = SendReport::default();
    loop {
        let next = cancellable(cancel, async { Ok(rx.recv().await) }).await?;
        let segment = match next {
            Some(segment) => segment?,
            None => return Ok(report),
        };

        debug!("Sending segment {}: {} bytes", report.segments, segment.len());
        cancellable(cancel, async {
            write_operation(stream, WireOperation::SendSegment).await?;
            write_length_prefixed(stream, &segment).await?;
            stream.flush().await?;
            Ok(())
        })
        .await?;

        report.segments += 1;
        report.bytes += segment.len() as u64;
    }
}

enum Frame {
    Segment(Vec<u8>),
    End,
    Ignored(Option<WireOperation>),
}

async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Frame> {
    Ok(match read_wire_operation(stream).await? {
        Some(WireOperation::SendSegment) => {
            Frame::Segment(read_length_prefixed(stream, MAX_SEGMENT_LEN).await?)
        }
        Some(WireOperation::EndOfTransfer) => Frame::End,
        other => Frame::Ignored(other),
    })
}

/// Store the file pushed by the peer.
///
/// Stream failures end the loop without an error: whatever arrived is
/// flushed and kept, and the outcome reports `complete == false`.
pub async fn receive_file<S>(
    session: &mut ReceivingSession<S>,
    cancel: &CancellationToken,
) -> Result<ReceiveOutcome>
where
    S: AsyncRead + Unpin,
{
    let options = session
        .options
        .as_ref()
        .ok_or_else(|| TransferError::InvalidState("accept options are not resolved".into()))?;
    let path = options.destination()?;
    receive_into(session.session.stream_mut(), &path, cancel).await
}

async fn receive_into<R>(stream: &mut R, path: &Path, cancel: &CancellationToken) -> Result<ReceiveOutcome>
where
    R: AsyncRead + Unpin,
{
    let mut file =
        cancellable(cancel, async { create_output_file(path).await.map_err(TransferError::from) })
            .await?;
    let mut outcome = ReceiveOutcome {
        path: path.to_path_buf(),
        segments: 0,
        bytes: 0,
        complete: false,
    };

    let result: Result<()> = async {
        loop {
            let frame = match cancellable(cancel, read_frame(stream)).await {
                Ok(frame) => frame,
                Err(e) if e.is_stream_failure() => {
                    warn!(
                        "Stream failed after {} segments, keeping partial file {}: {}",
                        outcome.segments,
                        path.display(),
                        e
                    );
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            match frame {
                Frame::Segment(segment) => {
                    cancellable(cancel, async {
                        file.write_all(&segment).await?;
                        file.flush().await?;
                        Ok(())
                    })
                    .await?;
                    outcome.segments += 1;
                    outcome.bytes += segment.len() as u64;
                    debug!(
                        "Wrote segment {}: {} bytes (total: {})",
                        outcome.segments, segment.len(), outcome.bytes
                    );
                }
                Frame::End => {
                    outcome.complete = true;
                    return Ok(());
                }
                Frame::Ignored(operation) => {
                    debug!("Ignoring {:?} during transfer", operation);
                }
            }
        }
    }
    .await;

    let flushed = file.flush().await;
    result?;
    flushed?;

    info!(
        "Received {} ({} bytes, {})",
        path.display(),
        outcome.bytes,
        if outcome.complete { "complete" } else { "incomplete" }
    );
    Ok(outcome)
}
