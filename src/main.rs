use clap::{Parser, Subcommand};
use peerftp::commands::send::parse_key_value;
use peerftp::{DEFAULT_MAX_BUFFER_SIZE, DEFAULT_PORT};
use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "peerftp")]
#[command(about = "Peer-to-peer file transfer with an accept/reject handshake", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Offer a file to a peer
    Send {
        /// Peer address, e.g. 192.168.1.20:7070
        addr: SocketAddr,
        /// Path to the file to send
        file_path: PathBuf,
        /// Largest segment size in bytes
        #[arg(short, long, default_value_t = DEFAULT_MAX_BUFFER_SIZE)]
        buffer_size: usize,
        /// Metadata attached to the request, repeatable
        #[arg(short, long = "meta", value_name = "KEY=VALUE", value_parser = parse_key_value)]
        meta: Vec<(String, String)>,
    },
    /// Ask a peer for one of its files
    Request {
        /// Peer address
        addr: SocketAddr,
        /// Name of the file to request
        name: String,
        /// Directory to store the file in
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Listen for peers and answer their requests
    Serve {
        /// Port to bind to
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Directory to serve from and store into
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,
        /// Refuse incoming files
        #[arg(long)]
        read_only: bool,
        /// Grant every request without checking it
        #[arg(long, conflicts_with = "read_only")]
        accept_all: bool,
        /// Largest segment size in bytes when sending
        #[arg(short, long, default_value_t = DEFAULT_MAX_BUFFER_SIZE)]
        buffer_size: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    // Configure logging based on verbose flag
    if cli.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
        log::info!("Verbose logging enabled");
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }

    match cli.command {
        Commands::Send { addr, file_path, buffer_size, meta } => {
            peerftp::commands::send::run(addr, &file_path, buffer_size, &meta).await?;
        }
        Commands::Request { addr, name, output_dir } => {
            peerftp::commands::request::run(addr, &name, &output_dir).await?;
        }
        Commands::Serve { port, dir, read_only, accept_all, buffer_size } => {
            peerftp::commands::serve::run(port, &dir, read_only, accept_all, buffer_size).await?;
        }
    }

    Ok(())
}
