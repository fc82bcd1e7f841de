use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;

use cipherbox_net::api::auth::{CredentialStore, KeychainStore, MemoryStore};
use cipherbox_net::api::types::ApiRequest;
use cipherbox_net::connectivity::{LogNavigator, LogNotifier};
use cipherbox_net::{AppContext, ClientConfig};

#[derive(Parser, Debug)]
#[command(name = "cipherbox-net", about = "CipherBox connectivity-aware API client")]
struct Args {
    /// API base URL (overrides CIPHERBOX_API_URL / VITE_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Seconds between background reachability probes while degraded
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    probe_interval: Option<u64>,

    /// GET this path through the request pipeline and print the body
    #[arg(long)]
    fetch: Option<String>,

    /// Keep credentials in memory instead of the OS keychain
    #[arg(long)]
    memory_credentials: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let mut config = match ClientConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if let Some(url) = args.api_url {
        config.api_base_url = url;
    }
    if let Some(secs) = args.probe_interval {
        config.probe_interval = Duration::from_secs(secs);
    }
    if let Err(e) = config.validate() {
        log::error!("Invalid configuration: {}", e);
        return ExitCode::FAILURE;
    }
    log::info!("CipherBox client starting (API: {})", config.api_base_url);

    let credentials: Arc<dyn CredentialStore> = if args.memory_credentials {
        Arc::new(MemoryStore::new())
    } else {
        Arc::new(KeychainStore::default())
    };

    let ctx = match AppContext::new(
        config,
        credentials,
        Arc::new(LogNotifier),
        Arc::new(LogNavigator),
    ) {
        Ok(ctx) => ctx,
        Err(e) => {
            log::error!("Failed to build HTTP client: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let subscription = ctx.monitor.subscribe(|state| {
        log::info!("Connectivity: {}", state.status().label());
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let probe_loop = tokio::spawn(Arc::clone(&ctx.monitor).run(shutdown_rx));

    // Establish the initial server status before doing anything else.
    ctx.monitor.force_check().await;

    let mut code = ExitCode::SUCCESS;
    if let Some(path) = args.fetch {
        match ctx.pipeline.send(ApiRequest::get(path.as_str())).await {
            Ok(resp) => println!("{}", resp.text()),
            Err(e) => {
                log::error!("GET {} failed: {}", path, e);
                code = ExitCode::FAILURE;
            }
        }
    } else {
        log::info!("Monitoring connectivity, press Ctrl-C to exit");
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::warn!("Failed to listen for Ctrl-C: {}", e);
        }
    }

    subscription.unsubscribe();
    let _ = shutdown_tx.send(true);
    if let Err(e) = probe_loop.await {
        log::warn!("Probe loop ended abnormally: {}", e);
    }
    ctx.cache.clear(None);
    log::info!("CipherBox client stopped");
    code
}
