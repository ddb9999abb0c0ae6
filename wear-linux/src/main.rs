// wearlink Linux daemon: discovery, transport and a JSON-lines application surface on stdio.

mod config;
mod discovery;
mod transport;

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wear_core::{
    BridgeConfig, BridgeError, Event, EventSink, HostContext, MethodCall, MethodResult, NodeId,
    WearableBridge,
};

use discovery::PeerTable;
use transport::TcpTransport;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Events go to the stdout writer task, one JSON line each.
struct StdoutSink {
    out: mpsc::UnboundedSender<serde_json::Value>,
}

impl EventSink for StdoutSink {
    fn deliver(&self, event: Event) {
        if self.out.send(event.to_json()).is_err() {
            debug!(method = event.method(), "stdout closed; event dropped");
        }
    }
}

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("wear-linux {}", VERSION);
            return Ok(());
        }
    }

    let (cfg, warnings) = config::load();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    config::report(&warnings);

    let rt = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    rt.block_on(run(cfg))
}

async fn run(cfg: config::Config) -> anyhow::Result<()> {
    let node_id = NodeId::generate();
    info!(node = %node_id, name = %cfg.display_name, "wear-linux {} starting", VERSION);

    let bridge = Arc::new(WearableBridge::new(BridgeConfig::default()));
    let peers = PeerTable::new();
    let transport = Arc::new(TcpTransport::new(node_id.clone(), peers.clone()));
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let guard = bridge.attach(HostContext {
        discovery: Arc::new(peers.clone()),
        transport: transport.clone(),
        data_layer: transport,
        sink: Arc::new(StdoutSink {
            out: out_tx.clone(),
        }),
    });

    tokio::spawn(write_stdout(out_rx));

    let disc_peers = peers.clone();
    let disc_id = node_id.clone();
    let display_name = cfg.display_name.clone();
    let (discovery_port, transport_port) = (cfg.discovery_port, cfg.transport_port);
    tokio::spawn(async move {
        if let Err(e) = discovery::run_discovery(
            disc_peers,
            disc_id,
            display_name,
            discovery_port,
            transport_port,
        )
        .await
        {
            warn!(error = %e, "discovery stopped");
        }
    });

    let trans_bridge = bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = transport::run_transport(trans_bridge, transport_port).await {
            warn!(error = %e, "transport stopped");
        }
    });

    tokio::spawn(read_stdin(bridge.clone(), out_tx));

    shutdown_signal().await?;
    info!("shutting down");
    guard.release();
    if let Err(e) = discovery::announce_leave(node_id, discovery_port).await {
        debug!(error = %e, "leave announcement failed");
    }
    Ok(())
}

/// One method call per stdin line; one result line per call.
async fn read_stdin(bridge: Arc<WearableBridge>, out: mpsc::UnboundedSender<serde_json::Value>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed");
                return;
            }
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let result = match serde_json::from_str(&line)
            .map_err(|e| BridgeError::InvalidArgument(format!("not JSON: {e}")))
            .and_then(MethodCall::from_json)
        {
            Ok(call) => {
                debug!(method = %call.method, "method call");
                bridge.handle_method_call(&call).await
            }
            Err(e) => MethodResult::from(e),
        };
        if out.send(result.to_json()).is_err() {
            return;
        }
    }
}

async fn write_stdout(mut rx: mpsc::UnboundedReceiver<serde_json::Value>) {
    let mut stdout = tokio::io::stdout();
    while let Some(value) = rx.recv().await {
        let mut line = value.to_string();
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            warn!(error = %e, "stdout write failed");
            return;
        }
        let _ = stdout.flush().await;
    }
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
