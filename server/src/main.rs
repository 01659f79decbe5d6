use std::time::Duration;

use clap::Parser;
use server::network::{Server, ServerConfig};
use shared::MapConfig;

/// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on
    #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
    port: u16,
    /// Rounds per game when a room does not specify its own count
    #[clap(short, long, default_value_t = shared::DEFAULT_TOTAL_ROUNDS)]
    rounds: u32,
    /// Seconds a connection may stay silent before it is reclaimed (0 = never)
    #[clap(long, default_value_t = 0)]
    idle_timeout: u64,
    /// Name of a map whose platforms seed every round layout
    #[clap(short, long)]
    map: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let base_layout = match &args.map {
        Some(name) => MapConfig::load(name).platforms().to_vec(),
        None => Vec::new(),
    };

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        default_rounds: args.rounds,
        idle_timeout: match args.idle_timeout {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
        base_layout,
    };

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                eprintln!("Server stopped with error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            println!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    Ok(())
}
