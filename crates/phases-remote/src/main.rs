mod config;
mod console;
mod logging;
mod session;
mod transport;

use std::io;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::{load_config, Args};
use crate::console::TextRenderer;
use crate::session::{Intent, Session};

const OUTBOUND_QUEUE: usize = 256;
const INTENT_QUEUE: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    let _log_guard = logging::init_logging(&config);
    info!(
        event = "phases_remote_start",
        url = %config.url,
        poll_ms = config.poll_interval.as_millis() as u64
    );

    let (outbound_tx, mut outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let (intent_tx, mut intent_rx) = mpsc::channel(INTENT_QUEUE);

    tokio::spawn(console::read_intents(intent_tx.clone()));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = intent_tx.send(Intent::Quit).await;
        }
    });

    println!("{}", console::HELP);
    let mut session = Session::new(
        config.poll_interval,
        outbound_tx,
        Box::new(TextRenderer::new(io::stdout())),
    );
    transport::run(&config.url, &mut session, &mut outbound_rx, &mut intent_rx).await;
    info!(event = "phases_remote_exit");
    Ok(())
}
