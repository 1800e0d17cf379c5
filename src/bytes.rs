use std::io;
use std::path::Path;

use log::debug;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Result, TransferError};

/// Reduce a path or peer-supplied name to its final component.
///
/// Both `/` and `\` count as separators so names produced on any platform
/// are stripped the same way. Empty names, `.`/`..` and names with NUL bytes
/// are refused.
pub fn base_file_name(path: &Path) -> Result<String> {
    let raw = path.to_string_lossy();
    let name = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    if name.is_empty() || name == "." || name == ".." || name.contains('\0') {
        return Err(TransferError::InvalidState(format!(
            "{:?} does not name a file",
            raw
        )));
    }
    Ok(name.to_string())
}

/// Read one segment of at most `max_len` bytes from a data source.
///
/// Keeps reading until the segment is full or the source is exhausted, so
/// every segment but the last is exactly `max_len` bytes long. An empty
/// vector means the source is exhausted.
pub async fn read_segment<R: AsyncRead + Unpin>(source: &mut R, max_len: usize) -> io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; max_len];
    let mut filled = 0;
    while filled < max_len {
        let n = source.read(&mut buffer[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

/// Open the file to be sent, returning it together with its length.
pub async fn open_source_file(path: &Path) -> io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let len = file.metadata().await?.len();
    debug!("Opened {} ({} bytes)", path.display(), len);
    Ok((file, len))
}

/// Create the destination file, truncating whatever is already there.
pub async fn create_output_file(path: &Path) -> io::Result<File> {
    debug!("Writing to file: {}", path.display());
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .await
}
