//! Line-oriented dispatcher: every stdin line goes to all connected hosts,
//! everything hosts send back is printed.
//!
//! Usage: `relay-dispatch [ws://host:port]`. Without an argument the URL
//! comes from `$RELAY_BROKER_URL`, then the local default.

mod console;

use std::sync::Arc;

use relay_client::{ClientAgent, ClientConfig, SendError};
use relay_protocol::constants::DEFAULT_BROKER_URL;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::console::ConsoleBus;

const URL_ENV: &str = "RELAY_BROKER_URL";

fn broker_url() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(URL_ENV).ok())
        .unwrap_or_else(|| DEFAULT_BROKER_URL.to_string())
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout stays readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(broker_url()))
}

async fn run(url: String) -> anyhow::Result<()> {
    let bus = Arc::new(ConsoleBus::new(relay_client::generate_dispatcher_id()));
    tracing::info!(id = %bus.id(), url = %url, "starting dispatcher");
    let handle = ClientAgent::spawn(ClientConfig::dispatcher(url), bus.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line {
                    "" => {}
                    "/who" => bus.print_roster(),
                    "/quit" => break,
                    text => match handle.send(text) {
                        Ok(()) => {}
                        Err(SendError::NotConnected) => eprintln!("! not connected, message dropped"),
                        Err(e) => eprintln!("! {e}"),
                    },
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.dispose();
    Ok(())
}
