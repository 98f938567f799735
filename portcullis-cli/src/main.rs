mod cli;
mod client;

use std::process;

use clap::Parser;
use cli::{Cli, Commands};
use portcullis_shared::wire::{Request, Response};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.global.debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = execute(cli).await;

    match result {
        Ok(()) => {}
        Err(error) => {
            eprintln!("Error: {error:#}");
            process::exit(1);
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let socket = cli.global.socket.as_str();

    let request = match cli.command {
        Commands::Ping => Request::Ping,
        Commands::Validate(args) => Request::Validate {
            policy: std::fs::read_to_string(&args.path)?,
        },
        Commands::Apply(args) => Request::ApplyBytes {
            policy: std::fs::read_to_string(&args.path)?,
        },
        Commands::Rollback => Request::Rollback,
        Commands::Teardown => Request::Teardown,
        Commands::RevertLkg => Request::RevertLkg,
        Commands::Watch(args) => Request::WatchSet {
            path: args.path.map(|p| p.to_string_lossy().into_owned()),
        },
        Commands::WatchStatus => Request::WatchStatus,
        Commands::GetLkg { full } => Request::GetLkg { include_body: full },
        Commands::Logs { tail } => Request::GetLogs {
            tail: Some(tail),
            since_minutes: None,
        },
    };

    match client::send(socket, request).await? {
        Response::Ok(body) => {
            println!("{}", serde_json::to_string_pretty(&body.payload)?);
            Ok(())
        }
        Response::Err(body) => {
            anyhow::bail!("{} ({})", body.error_message, body.error_code);
        }
    }
}
