//! Relay binary: loads the shared YAML config, builds a mutual-TLS
//! acceptor, and runs the raw-tunnel and/or stream-tunnel listeners
//! named by the `server` section until a shutdown signal arrives.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::Parser;
use throughway::{Config, RelayApp};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "throughway-relay")]
#[command(about = "Relay terminating mutual-TLS tunnels and dialing origins")]
struct Args {
    /// Path to the shared YAML configuration.
    #[arg(short = 'c', long = "config", default_value = "config.yaml")]
    config: PathBuf,

    /// Validate the configuration and exit without starting any listener.
    #[arg(short = 't', long = "test")]
    test: bool,
}

fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().max(2))
        .enable_all()
        .thread_name("throughway-relay")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match Config::load(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load configuration {}: {}", args.config.display(), e);
            std::process::exit(1);
        }
    };

    let _guard = throughway::logging::init(&config.common);

    if let Err(e) = config.validate_relay() {
        error!(error = %e, "invalid relay configuration");
        std::process::exit(1);
    }

    if args.test {
        info!("configuration test passed");
        return Ok(());
    }

    let app = match RelayApp::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "failed to initialize relay");
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let run_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { app.run(cancel).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    cancel.cancel();

    match run_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "relay exited with error"),
        Err(e) => error!(error = %e, "relay task panicked"),
    }

    info!("relay stopped");
    Ok(())
}
