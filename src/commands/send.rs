use std::error::Error;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use indicatif::ProgressBar;
use log::debug;
use serde_json::Value;

use crate::commands::ctrl_c_token;
use crate::utils::{FileSendOptions, Metadata};
use crate::Client;

/// Turn `key=value` pairs into handshake metadata.
///
/// Values that parse as JSON keep their type (`size=10` is a number),
/// anything else is sent as a string.
pub fn build_metadata(pairs: &[(String, String)]) -> Option<Metadata> {
    if pairs.is_empty() {
        return None;
    }
    let mut metadata = Metadata::new();
    for (key, raw) in pairs {
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
        metadata.insert(key.clone(), value);
    }
    Some(metadata)
}

/// clap value parser for `--meta key=value`.
pub fn parse_key_value(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", arg)),
    }
}

/// Offer `file_path` to the peer at `addr` and stream it once accepted.
pub async fn run(
    addr: SocketAddr,
    file_path: &Path,
    buffer_size: usize,
    meta: &[(String, String)],
) -> Result<(), Box<dyn Error>> {
    if !file_path.is_file() {
        return Err(format!("Not a file: {}", file_path.display()).into());
    }

    let mut client = Client::new();
    client.connect(addr);
    let options = FileSendOptions::new(file_path).with_max_buffer_size(buffer_size);
    debug!("Sending {} to {} in segments of {} bytes", file_path.display(), addr, buffer_size);

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Sending {}", file_path.display()));

    let cancel = ctrl_c_token();
    match client.send_file(options, build_metadata(meta), &cancel).await {
        Ok(report) => {
            spinner.finish_with_message(format!(
                "Transfer complete: {} bytes in {} segments",
                report.bytes, report.segments
            ));
            Ok(())
        }
        Err(e) => {
            spinner.abandon_with_message("Transfer failed");
            Err(e.into())
        }
    }
}
