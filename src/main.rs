//! relay-hub host binary. All logic lives in the workspace crates.

use std::path::PathBuf;

use clap::Parser;
use relayhub_host::{run_host, HostOptions};

/// Single-instance host that relays event sources to attached UI surfaces
#[derive(Parser, Debug)]
#[command(name = "relayhub")]
#[command(about = "Event-source relay host", long_about = None)]
struct Args {
    /// Override the data directory (lock, log and storage files)
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Run without operator prompts (auto back-off, no resets)
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    let code = match run_host(HostOptions {
        data_dir: args.data_dir,
        headless: args.headless,
        game_service: None,
    })
    .await
    {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Fatal: {e}");
            eprintln!("relayhub: {e}");
            1
        }
    };
    std::process::exit(code);
}
