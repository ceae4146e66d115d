//! Minimal admin CLI: connects to the relay fabric as an `admin` client and
//! issues the two out-of-band operations §6.3 reserves for that role —
//! requesting a health snapshot and forcing a relay takeover.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashSet;
use tabrelay::domain_types::ClientType;
use tabrelay::relay::client::RelayClient;
use tabrelay::relay::domain_types::{
    CommandPayload, Frame, FrameTarget, FrameType, HealthReportPayload, IdentifyPayload,
};
use tabrelay::tool_server::domain_types::OperationId;
use tracing::info;

#[derive(Parser)]
#[command(name = "tabrelay-admin", about = "Out-of-band control for a running tabrelay fabric")]
struct Cli {
    /// Relay fabric port to connect to.
    #[arg(long, default_value_t = 54321)]
    port: u16,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Requests a health snapshot from the endpoint gateway.
    Health,
    /// Forces the endpoint gateway to relinquish and re-acquire its relay
    /// connection, exercising the takeover path on demand.
    Takeover,
}

#[tokio::main]
async fn main() -> Result<()> {
    tabrelay::observability::init_test_tracing();
    let cli = Cli::parse();

    let mut client = RelayClient::connect(
        cli.port,
        IdentifyPayload {
            client_type: ClientType::Admin,
            name: "tabrelay-admin".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: HashSet::new(),
            pid: Some(std::process::id()),
        },
    )
    .await
    .context("connecting to relay fabric")?;

    match cli.command {
        Command::Health => request_health(&mut client).await,
        Command::Takeover => request_takeover(&mut client).await,
    }
}

async fn request_health(client: &mut RelayClient) -> Result<()> {
    let frame = Frame::new(
        FrameType::HealthReport,
        None,
        Some(FrameTarget::type_class(ClientType::Endpoint)),
        serde_json::json!({}),
    );
    client.send(&frame).await.context("sending health.report request")?;

    let Some(response) = client.recv().await else {
        anyhow::bail!("relay connection closed before a health report arrived");
    };
    let report: HealthReportPayload =
        serde_json::from_value(response.payload).context("parsing health report")?;
    for connection in report.connections {
        println!(
            "{}: {} (idle {}s, recv={} sent={} reconnects={} queue={})",
            connection.client_id,
            connection.classification,
            connection.idle_seconds,
            connection.messages_received,
            connection.messages_sent,
            connection.reconnect_count,
            connection.queue_length,
        );
    }
    Ok(())
}

async fn request_takeover(client: &mut RelayClient) -> Result<()> {
    let operation_id = OperationId::mint("force_relay_takeover");
    let frame = Frame::new(
        FrameType::Command,
        None,
        Some(FrameTarget::type_class(ClientType::Endpoint)),
        serde_json::json!(CommandPayload {
            operation_id: operation_id.clone(),
            command: "force_relay_takeover".to_string(),
            params: serde_json::json!({}),
        }),
    );
    client.send(&frame).await.context("sending force_relay_takeover command")?;
    info!(%operation_id, "takeover requested");
    println!("takeover requested: {operation_id}");
    Ok(())
}
