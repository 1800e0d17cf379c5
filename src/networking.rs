//! Wire primitives shared by both peers.
//!
//! Every integer on the wire is a little-endian u32, booleans are a single
//! byte holding 0 or 1, and byte strings carry a u32 length prefix. Reads
//! either return the exact requested shape or fail; callers never loop.

use std::future::Future;
use std::net::SocketAddr;

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TransferError};

/// Messages exchanged over a transfer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum WireOperation {
    RequestSendPermission = 0,
    RequestReceivePermission = 1,
    SendSegment = 2,
    EndOfTransfer = 3,
}

impl WireOperation {
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Unknown tags decode to `None`; whether that is fatal is up to the caller.
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(WireOperation::RequestSendPermission),
            1 => Some(WireOperation::RequestReceivePermission),
            2 => Some(WireOperation::SendSegment),
            3 => Some(WireOperation::EndOfTransfer),
            _ => None,
        }
    }
}

/// Race `fut` against the cancellation token.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TransferError::Cancelled),
        res = fut => res,
    }
}

pub async fn open_connection(addr: SocketAddr) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    debug!("Connected to {}", addr);
    Ok(stream)
}

pub async fn write_bool<W: AsyncWrite + Unpin>(writer: &mut W, value: bool) -> Result<()> {
    writer.write_u8(value as u8).await?;
    Ok(())
}

pub async fn read_bool<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool> {
    match reader.read_u8().await? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(TransferError::ProtocolViolation(format!(
            "expected boolean 0 or 1, got {}",
            other
        ))),
    }
}

pub async fn write_u32<W: AsyncWrite + Unpin>(writer: &mut W, value: u32) -> Result<()> {
    writer.write_u32_le(value).await?;
    Ok(())
}

pub async fn read_u32<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u32> {
    Ok(reader.read_u32_le().await?)
}

pub async fn write_operation<W: AsyncWrite + Unpin>(
    writer: &mut W,
    operation: WireOperation,
) -> Result<()> {
    write_u32(writer, operation.tag()).await
}

/// Reads one tag. `Ok(None)` means the tag is not a known operation.
pub async fn read_wire_operation<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<WireOperation>> {
    let tag = read_u32(reader).await?;
    let operation = WireOperation::from_tag(tag);
    if operation.is_none() {
        debug!("Read unknown operation tag {}", tag);
    }
    Ok(operation)
}

/// Reads exactly `len` bytes into a fresh buffer.
pub async fn read_exact_bytes<R: AsyncRead + Unpin>(reader: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; len];
    reader.read_exact(&mut buffer).await?;
    Ok(buffer)
}

pub async fn write_length_prefixed<W: AsyncWrite + Unpin>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| {
        TransferError::ProtocolViolation(format!("{} bytes exceed the u32 length prefix", bytes.len()))
    })?;
    write_u32(writer, len).await?;
    writer.write_all(bytes).await?;
    Ok(())
}

/// Reads a length prefix and then exactly that many bytes, refusing lengths above `max_len`.
pub async fn read_length_prefixed<R: AsyncRead + Unpin>(reader: &mut R, max_len: u32) -> Result<Vec<u8>> {
    let len = read_u32(reader).await?;
    if len > max_len {
        return Err(TransferError::ProtocolViolation(format!(
            "length prefix {} exceeds limit {}",
            len, max_len
        )));
    }
    read_exact_bytes(reader, len as usize).await
}

pub async fn write_string<W: AsyncWrite + Unpin>(writer: &mut W, value: &str) -> Result<()> {
    write_length_prefixed(writer, value.as_bytes()).await
}

pub async fn read_string<R: AsyncRead + Unpin>(reader: &mut R, max_len: u32) -> Result<String> {
    let bytes = read_length_prefixed(reader, max_len).await?;
    String::from_utf8(bytes)
        .map_err(|e| TransferError::ProtocolViolation(format!("string is not valid UTF-8: {}", e)))
}
