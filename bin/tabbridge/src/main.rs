mod commands;
mod handlers;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tabbridge")]
#[command(about = "HTTP control plane for a CDP browser", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge server (the default when no subcommand is given)
    Serve {
        /// Port to listen on (overrides BRIDGE_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Run the browser headless (overrides BRIDGE_HEADLESS)
        #[arg(long)]
        headless: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    let (port, headless) = match cli.command {
        Some(Commands::Serve { port, headless }) => (port, headless),
        None => (None, false),
    };

    if let Err(e) = commands::serve::run(port, headless).await {
        eprintln!("tabbridge: {}", e);
        std::process::exit(1);
    }
}
