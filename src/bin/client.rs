//! Client binary: loads the shared YAML config, builds the HTTP/SOCKS5
//! fronts plus the rule engine, resolver, and forward registry they
//! dispatch through, then runs until a shutdown signal arrives.

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::Parser;
use throughway::{ClientApp, Config};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "throughway-client")]
#[command(about = "HTTP/SOCKS5 proxy front that tunnels through a mutual-TLS relay")]
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
        .thread_name("throughway-client")
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

    if let Err(e) = config.validate_client() {
        error!(error = %e, "invalid client configuration");
        std::process::exit(1);
    }

    if args.test {
        info!("configuration test passed");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let app = match ClientApp::new(&config, cancel.clone()) {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "failed to initialize client");
            std::process::exit(1);
        }
    };

    let run_handle = {
        let cancel = cancel.clone();
        tokio::spawn(async move { app.run(cancel).await })
    };

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");
    cancel.cancel();

    match run_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "client exited with error"),
        Err(e) => error!(error = %e, "client task panicked"),
    }

    info!("client stopped");
    Ok(())
}
