//! `portcullisd`: the network access control daemon.

use std::sync::Arc;

use clap::Parser;
use portcullis::adapter::InMemoryAdapter;
use portcullis::config::{DaemonConfig, Layout};
use portcullis::control;
use portcullis::lifecycle::DaemonState;
use portcullis::{logging, watch};

#[derive(Debug, Parser)]
#[command(name = "portcullisd", about = "Network access control daemon")]
struct Cli {
    /// Directory for LKG store, audit log, and logs. Defaults to
    /// $PORTCULLIS_HOME or a platform data directory.
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,

    /// Local socket name for the control plane.
    #[arg(long, default_value = "portcullis-control")]
    socket: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = cli.data_dir.unwrap_or_else(DaemonConfig::default_data_dir);
    let layout = Layout::init_global(data_dir.clone()).clone();
    layout.ensure_dirs()?;

    logging::init(&layout)?;

    let config = DaemonConfig {
        data_dir,
        socket_name: cli.socket.clone(),
        ..DaemonConfig::default()
    };

    let state = Arc::new(DaemonState::new(
        config,
        layout,
        Arc::new(InMemoryAdapter::new()),
    ));

    let report = state.startup();
    if report.installed_from_lkg {
        tracing::info!("installed filters from Last-Known-Good store");
    } else if let Some(reason) = &report.reason {
        tracing::info!("starting with no filters installed: {reason}");
    }

    let watch_state = state.clone();
    let watch_task = tokio::spawn(async move {
        watch::run(watch_state).await;
    });

    let socket_name = cli.socket.clone();
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    control::serve(state, &socket_name, shutdown).await?;

    watch_task.abort();
    Ok(())
}
