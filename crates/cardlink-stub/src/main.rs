//! Cardlink demo: a master and a slave endpoint wired over the in-process
//! loopback, driving a scripted stub reader end to end.
//!
//! The demo walks the whole protocol once: the slave offers its reader, the
//! master observes the connect, a card shows up, the master transmits a
//! command set through the virtual reader, and the slave withdraws the
//! reader again.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cardlink_core::{ApduRequest, ChannelControl, NodeConfig, TransmissionMode};
use cardlink_master::MasterApi;
use cardlink_slave::{NativeReader, SlaveApi};
use cardlink_stub::{channel_link, spawn_pump, StubCard, StubReader};

#[derive(Debug, Parser)]
#[command(name = "cardlink-demo", about = "Drive a scripted remote reader end to end")]
struct Args {
    /// TOML config file for the master endpoint; defaults are used if absent.
    #[arg(long)]
    master_config: Option<PathBuf>,

    /// TOML config file for the slave endpoint; defaults are used if absent.
    #[arg(long)]
    slave_config: Option<PathBuf>,

    /// Request timeout override in milliseconds for both endpoints.
    #[arg(long, env = "CARDLINK_TIMEOUT_MS")]
    timeout_ms: Option<u64>,
}

fn load_config(path: Option<&PathBuf>, default_node_id: &str) -> anyhow::Result<NodeConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            Ok(NodeConfig::from_toml_str(&text)
                .with_context(|| format!("parsing config file {}", path.display()))?)
        }
        None => Ok(NodeConfig::new(default_node_id)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging. Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut master_config = load_config(args.master_config.as_ref(), "demo-master")?;
    let mut slave_config = load_config(args.slave_config.as_ref(), "demo-slave")?;
    if let Some(timeout_ms) = args.timeout_ms {
        master_config.request_timeout_ms = timeout_ms;
        slave_config.request_timeout_ms = timeout_ms;
    }

    // One directed link per direction; each endpoint pumps its own inbox.
    let (to_master, master_inbox) = channel_link();
    let (to_slave, slave_inbox) = channel_link();

    let master = MasterApi::new(&master_config, "cardlink-demo", Arc::new(to_slave));
    let slave = SlaveApi::new(&slave_config, master.node_id().clone(), Arc::new(to_master));

    {
        let master = master.clone();
        spawn_pump(master_inbox, move |envelope| {
            let master = master.clone();
            async move { master.on_envelope(envelope).await }
        });
    }
    {
        let slave = slave.clone();
        spawn_pump(slave_inbox, move |envelope| {
            let slave = slave.clone();
            async move { slave.on_envelope(envelope).await }
        });
    }

    // A stub reader with one scripted record-read exchange.
    let reader = Arc::new(StubReader::new("stub-0", TransmissionMode::Contactless));
    slave
        .register_reader(Arc::clone(&reader) as Arc<dyn NativeReader>)
        .await;

    let mut plugin_events = master.plugin().subscribe();

    let session_id = slave.connect_reader("stub-0", BTreeMap::new()).await?;
    info!(session = %session_id, "reader offered and bound");
    let connected = plugin_events.recv().await?;
    info!(event = ?connected, "plugin observer saw");

    let virtual_reader = master
        .plugin()
        .reader("remote-demo-slave-stub-0")
        .await
        .context("virtual reader should exist after connect")?;
    let mut reader_events = virtual_reader.subscribe();

    reader.insert_card(
        StubCard::from_hex_atr("3B 88 80 01 00 00 00 00 00 00 00 00 09")?
            .with_hex_command("00 B2 01 44 00", "00 11 22 33 90 00"),
    );
    let insertion = tokio::time::timeout(Duration::from_secs(2), reader_events.recv())
        .await
        .context("waiting for insertion event")??;
    info!(event = ?insertion, "virtual reader observer saw");

    let result = virtual_reader
        .transmit_set(
            vec![ApduRequest::from_hex("00 B2 01 44 00")?],
            ChannelControl::CloseAfter,
        )
        .await?;
    for response in &result.responses {
        info!(response = %response, success = response.is_success(), "card answered");
    }

    slave.disconnect_reader(&session_id, "stub-0").await?;
    let disconnected = plugin_events.recv().await?;
    info!(event = ?disconnected, "plugin observer saw");

    info!("demo complete");
    Ok(())
}
