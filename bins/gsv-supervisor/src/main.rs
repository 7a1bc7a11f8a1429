use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use gsv_supervisor::{AlwaysRestart, ServerSupervisor, SupervisorConfig};

/// Game server supervisor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE", default_value = "config/supervisor.yaml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Restart the server after every exit (overrides config)
    #[arg(long)]
    auto_live: bool,

    /// Restart after crashes without asking on the terminal
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SupervisorConfig::load_from_file(&args.config)?;
    if args.auto_live {
        config.auto_live = true;
    }

    let level = if args.debug { "debug" } else { config.log_level.as_str() };
    initialize_logging(level)?;

    info!("Starting game server supervisor");
    info!("Config file: {}", args.config);
    info!(
        "Server: {} (auto-live: {})",
        config.executable_path().display(),
        config.auto_live
    );

    let mut builder = ServerSupervisor::builder(config);
    if args.headless {
        builder = builder.prompt(Arc::new(AlwaysRestart));
    }
    let supervisor = builder.build()?;

    let signal = shutdown_signal();
    tokio::pin!(signal);

    // Startup can spend a while retrying the remote channel
    tokio::select! {
        result = supervisor.initialize() => {
            if let Err(e) = result {
                error!("Failed to initialize supervisor: {}", e);
                std::process::exit(1);
            }
            info!("Supervisor started");
        }
        received = &mut signal => {
            received?;
            info!("Shutdown requested during startup");
            stop(&supervisor).await;
            return Ok(());
        }
    }

    tokio::select! {
        received = &mut signal => {
            received?;
            stop(&supervisor).await;
        }
        code = supervisor.wait_for_exit_request() => {
            supervisor.close();
            info!("Exiting with code {}", code);
            std::process::exit(code);
        }
    }

    Ok(())
}

/// Operator-requested shutdown.
async fn stop(supervisor: &ServerSupervisor) {
    info!("Shutting down server...");
    if let Err(e) = supervisor.shutdown().await {
        error!("Shutdown failed: {}", e);
    }
    supervisor.close();
    info!("Supervisor stopped");
}

fn initialize_logging(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    Ok(())
}

/// Resolves on the first SIGTERM or SIGINT (Ctrl+C on Windows).
async fn shutdown_signal() -> Result<()> {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM signal");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT signal");
            }
        }
    }

    #[cfg(windows)]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C signal");
    }

    Ok(())
}
