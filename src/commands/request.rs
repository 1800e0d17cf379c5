use std::error::Error;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use indicatif::ProgressBar;
use log::{debug, warn};

use crate::commands::ctrl_c_token;
use crate::utils::FileAcceptOptions;
use crate::Client;

/// Ask the peer at `addr` for `name` and store it in `output_dir`.
pub async fn run(addr: SocketAddr, name: &str, output_dir: &Path) -> Result<(), Box<dyn Error>> {
    if !output_dir.is_dir() {
        return Err(format!("Not a directory: {}", output_dir.display()).into());
    }

    let mut client = Client::new();
    client.connect(addr);
    debug!("Requesting {} from {} into {}", name, addr, output_dir.display());

    let spinner = ProgressBar::new_spinner();
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner.set_message(format!("Waiting to receive {}", name));

    let cancel = ctrl_c_token();
    let result = client
        .request_file(|| FileAcceptOptions::new(name, output_dir), None, &cancel)
        .await;

    match result {
        Ok(outcome) if outcome.complete => {
            spinner.finish_with_message(format!(
                "File saved: {} ({} bytes)",
                outcome.path.display(),
                outcome.bytes
            ));
            Ok(())
        }
        Ok(outcome) => {
            spinner.abandon_with_message("Transfer interrupted");
            warn!("Peer stopped early, {} holds only {} bytes", outcome.path.display(), outcome.bytes);
            Err(format!("incomplete transfer: {}", outcome.path.display()).into())
        }
        Err(e) => {
            spinner.abandon_with_message("Transfer failed");
            Err(e.into())
        }
    }
}
