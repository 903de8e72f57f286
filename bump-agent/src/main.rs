//! Command-line agent for handing claims between nearby devices.
//! `send` issues a claim and pushes it over the local link; `receive`
//! waits for one and redeems it.

mod api;
mod config;
mod discovery;
mod driver;
mod transport;

use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "bump-agent", version, about = "Hand claims to nearby devices")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Issue a claim and push it to the first nearby receiver
    Send {
        /// Amount to hand off
        amount: f64,
        /// Asset symbol (the server default applies when omitted)
        #[arg(long)]
        token: Option<String>,
    },
    /// Wait for a nearby sender and redeem whatever arrives
    Receive,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bump_agent=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = config::load();

    match cli.command {
        Command::Send { amount, token } => driver::run_sender(config, amount, token).await,
        Command::Receive => driver::run_receiver(config).await,
    }
}
