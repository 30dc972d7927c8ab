//! tether — relay client CLI.
//!
//! Runs a supervised relay connection, generates RSA key pairs for the
//! admission handshake, and watches a relay's registry.

mod commands;

use clap::{Parser, Subcommand};
use tracing::error;

/// tether — signaling relay client
#[derive(Parser)]
#[command(
    name = "tether",
    version,
    about = "Signaling relay client — supervised connection, keygen, registry monitor"
)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the relay and stay connected until interrupted
    Run {
        /// Config file path
        #[arg(long, default_value = "~/.tether/client.toml")]
        config: String,
    },

    /// Generate an RSA key pair for the admission handshake
    Keygen {
        /// Output directory for key.pem and key.pub.pem
        #[arg(long, default_value = "~/.tether")]
        out_dir: String,

        /// Key size in bits
        #[arg(long, default_value_t = 2048)]
        bits: usize,
    },

    /// Watch a relay's registry snapshots
    Monitor {
        /// Monitor URL, e.g. ws://relay.example.com:8080/info
        url: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("tether=debug,tether_cli=debug,tether_client=debug,tether_core=debug")
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("tether=info,tether_cli=info,tether_client=info")
            .with_target(false)
            .init();
    }

    let result = match cli.command {
        Command::Run { config } => commands::run::run(&config).await,
        Command::Keygen { out_dir, bits } => commands::keygen::run(&out_dir, bits),
        Command::Monitor { url } => commands::monitor::run(&url).await,
    };

    if let Err(e) = result {
        error!(error = %e, "command failed");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
