//! Player-state sync demo.
//!
//! Watches the accounts given on the command line and streams a paced
//! "player state" update through the recycled outbound pipeline until
//! Ctrl-C.
//!
//! ```text
//! ROLLSYNC_WS_URL=ws://127.0.0.1:8900 ROLLSYNC_HTTP_URL=http://127.0.0.1:8899 \
//!     cargo run -p player-sync -- <account> [<account>...]
//! ```

use std::sync::Arc;

use rollsync::prelude::*;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, trace, warn};
use tracing_subscriber::EnvFilter;

const SEND_METHOD: &str = "sendPlayerState";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let keys: Vec<String> = std::env::args().skip(1).collect();
    if keys.is_empty() {
        eprintln!("usage: player-sync <account> [<account>...]");
        std::process::exit(2);
    }

    let config = ClientConfig::from_env()?;
    let client = Client::builder().config(config.clone()).start().await?;
    let mut events = client.events();

    for key in &keys {
        let account = key.clone();
        client
            .watch(key.as_str(), move |state: EntityState| {
                info!(
                    %account,
                    slot = state.slot,
                    lamports = state.account.lamports,
                    "account update"
                );
            })
            .await?;
    }
    info!(watched = keys.len(), ws = %config.ws_url, "watching accounts");

    let pacing = Arc::new(PacingController::new(config.pacing));
    let _probe = client.spawn_latency_probe(Arc::clone(&pacing))?;

    let factory = client.pipeline_factory().with_context(PipelineContext {
        label: "player-sync".into(),
    });
    let recycler = Arc::new(ConnectionRecycler::new(factory, config.recycle_period).await?);
    let sender = tokio::spawn(send_loop(Arc::clone(&pacing), recycler));

    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, shutting down");
                break Ok(());
            }
            event = events.recv() => match event {
                Ok(ClientEvent::GaveUp { attempts }) => {
                    break Err(format!("gave up reconnecting after {attempts} attempts"));
                }
                Ok(event) => info!(?event, "client event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed client events"),
                Err(RecvError::Closed) => break Ok(()),
            },
        }
    };

    sender.abort();
    client.close().await;
    outcome.map_err(Into::into)
}

/// Sends one player-state update per pacing slot. Each call runs detached
/// so a slow round trip never holds back the next slot.
async fn send_loop(
    pacing: Arc<PacingController>,
    recycler: Arc<ConnectionRecycler<HttpPipelineFactory>>,
) {
    let mut scheduler = SendScheduler::new(pacing, SendConfig::default());
    let mut position: u64 = 0;

    loop {
        let slot = scheduler.wait_for_send().await;
        if let Err(e) = recycler.refresh_if_due().await {
            warn!(error = %e, "pipeline refresh failed");
        }

        position += 1;
        let params = json!([{ "player": "demo", "x": position % 100, "seq": slot.seq }]);
        let pipeline = recycler.current();
        recycler.note_send();
        tokio::spawn(async move {
            match pipeline.call(SEND_METHOD, params).await {
                Ok(_) => trace!(pipeline = pipeline.id(), "update sent"),
                Err(e) => warn!(pipeline = pipeline.id(), error = %e, "update failed"),
            }
        });

        if slot.late {
            trace!(interval_ms = slot.interval.as_millis() as u64, "send slot ran late");
        }
    }
}
