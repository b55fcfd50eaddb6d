use clap::Parser;
use log::{error, info};
use server::network::Server;
use server::room::Rooms;
use server::ServerConfig;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, builds the room registry, then runs the
/// accept loop until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "9000")]
        port: u16,
        /// Number of two-player match rooms
        #[clap(short, long, default_value = "2")]
        rooms: usize,
        /// Round length in seconds
        #[clap(long, default_value = "10")]
        round_secs: u64,
        /// Seconds between round end and players returning to the lobby
        #[clap(long, default_value = "10")]
        lobby_delay_secs: u64,
        /// Directory grid snapshots are written into
        #[clap(long, default_value = ".")]
        export_dir: PathBuf,
    }

    env_logger::init();
    let args = Args::parse();

    std::fs::create_dir_all(&args.export_dir)?;
    let config = Arc::new(ServerConfig {
        round_duration: Duration::from_secs(args.round_secs),
        lobby_delay: Duration::from_secs(args.lobby_delay_secs),
        export_dir: args.export_dir,
    });

    let rooms = Arc::new(Rooms::new(args.rooms, config));
    let address = format!("{}:{}", args.host, args.port);
    let server = Server::new(&address, rooms).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
