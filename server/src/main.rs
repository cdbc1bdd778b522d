use clap::Parser;
use log::{debug, error, info};
use server::network::Server;
use server::tls;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Main-method of the application.
/// Parses command-line arguments, loads the TLS identity, then runs the
/// session host until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Address to bind to
        #[clap(short = 'H', long, default_value = "0.0.0.0")]
        host: String,
        /// Port carrying both HTTPS and WebSocket traffic
        #[clap(short, long, default_value = "8443")]
        port: u16,
        /// Path to the PEM certificate chain
        #[clap(long)]
        cert: PathBuf,
        /// Path to the PEM private key
        #[clap(long)]
        key: PathBuf,
        /// Players required before a round can start
        #[clap(short, long, default_value = "1")]
        min_players: usize,
    }

    env_logger::init();
    let args = Args::parse();

    let acceptor = tls::load_identity(&args.cert, &args.key)?;

    // Session events feed the game world; the headless host just logs them
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let event_task = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            debug!("Session event: {:?}", event);
        }
    });

    let address = format!("{}:{}", args.host, args.port);
    let (mut server, handle) = Server::new(&address, acceptor, args.min_players, event_tx).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    drop(handle);
    event_task.abort();
    Ok(())
}
