//! Kardia Dual Relay Node
//!
//! Watches the external chain for transactions sent to the monitored
//! exchange contract and relays them as dual events:
//! 1. New external heads are forwarded through a single-slot channel
//! 2. Each block is scanned for calls to the monitored contract
//! 3. Matched calls become dual events in the event pool
//! 4. A signed `matchAmount` transaction is submitted to the local chain
//!
//! # Dev Mode
//!
//! With `DEV_TRIGGER_INTERVALS_MS` set, fabricated deposit blocks are fed
//! into the pipeline on a timer. Chains without a configured RPC URL are
//! then replaced by in-memory chains.

use std::sync::Arc;

use dual_relay::api;
use dual_relay::composer::TxComposer;
use dual_relay::config::Config;
use dual_relay::memory::{MemoryChain, MemoryHeadSource};
use dual_relay::metrics::Metrics;
use dual_relay::ports::HeadSource;
use dual_relay::rpc::{http_provider, RpcChainState, RpcHeadSource, RpcSubmitter};
use dual_relay::types::{EXTERNAL_CHAIN, LOCAL_CHAIN};
use dual_relay::{ChainEndpoint, DualRelay};
use eyre::WrapErr;
use tracing::{error, info, warn};

fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting Kardia dual relay");

    let config = Config::load()?;
    let relay_config = config.relay_config()?;
    info!(
        monitored = %relay_config.monitored.address(),
        dual_state = %relay_config.dual_state_address,
        match_ratio = relay_config.match_ratio,
        light_node = relay_config.light_node,
        dev_mode = config.is_dev_mode(),
        "Configuration loaded"
    );

    let gas = config.gas();
    let local_composer = Arc::new(TxComposer::new(
        config.local_credential()?,
        LOCAL_CHAIN,
        config.local.chain_id,
        config.local_exchange()?,
        gas,
    ));
    let external_composer = Arc::new(TxComposer::new(
        config.external_credential()?,
        EXTERNAL_CHAIN,
        config.external.chain_id,
        relay_config.monitored.address(),
        gas,
    ));

    let local = endpoint(LOCAL_CHAIN, config.local.rpc_url.as_deref(), local_composer)?;
    let external = endpoint(
        EXTERNAL_CHAIN,
        config.external.rpc_url.as_deref(),
        external_composer,
    )?;

    let source: Arc<dyn HeadSource> = match config.external.rpc_url.as_deref() {
        Some(url) => Arc::new(RpcHeadSource::new(
            http_provider(url)?,
            config.head_poll_interval(),
        )),
        None => MemoryHeadSource::new(),
    };

    let metrics = Arc::new(Metrics::new());
    let relay = Arc::new(DualRelay::new(relay_config, local, external, metrics));

    if config.metrics.enabled {
        let http = config.metrics.http.clone();
        let port = config.metrics.port;
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            if let Err(e) = api::start_server(&http, port, relay).await {
                error!(error = %e, "API server failed");
            }
        });
    }

    relay
        .run(source.as_ref(), wait_for_shutdown_signal())
        .await
        .wrap_err("Dual relay terminated")?;

    info!("Kardia dual relay stopped");
    Ok(())
}

/// Live RPC collaborators, or an in-memory chain when no URL is configured
fn endpoint(
    chain: &str,
    rpc_url: Option<&str>,
    composer: Arc<TxComposer>,
) -> eyre::Result<ChainEndpoint> {
    Ok(match rpc_url {
        Some(url) => {
            let provider = http_provider(url)?;
            info!(chain, rpc = %url, "Using JSON-RPC chain");
            ChainEndpoint {
                state: Arc::new(RpcChainState::new(chain, provider.clone())),
                submitter: Arc::new(RpcSubmitter::new(chain, provider)),
                composer,
            }
        }
        None => {
            warn!(chain, "No RPC URL configured, using in-memory chain");
            let memory = Arc::new(MemoryChain::new(chain));
            ChainEndpoint {
                state: memory.clone(),
                submitter: memory,
                composer,
            }
        }
    })
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dual_relay=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
