//! Operator dispatcher daemon
//!
//! Wires the dispatcher to its chain, cache and signer, serves metrics, and
//! keeps the pending-transaction ledger compacted between dispatches.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use operator_dispatcher::cache::{self, ShadowLedger};
use operator_dispatcher::chain::EthersGateway;
use operator_dispatcher::config::Settings;
use operator_dispatcher::contract::{AbiRegistry, ErrorClassifier};
use operator_dispatcher::events::{self, Telemetry, TracingSink};
use operator_dispatcher::metrics::MetricsServer;
use operator_dispatcher::tx::{
    CodeAndMessagePredicate, NonceSequencer, ProviderFeeOracle, TransactionDispatcher,
    WalletBroadcaster,
};
use operator_dispatcher::DispatchContext;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting operator dispatcher v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for chain {} ({}) with {} contract ABIs",
        settings.chain.name,
        settings.chain.chain_id,
        settings.contracts.len()
    );

    let gateway = Arc::new(EthersGateway::new(settings.chain.clone())?);
    info!("Chain gateway initialized");

    let sequence_cache = cache::connect(&settings.cache).await?;
    let ledger = ShadowLedger::new(sequence_cache, &settings.cache);

    let registry = Arc::new(AbiRegistry::load(&settings.contracts)?);
    info!("Registered {} contract ABIs", registry.len());
    let classifier = Arc::new(ErrorClassifier::new(
        registry,
        settings.dispatch.meta_call_error.clone(),
    ));

    let broadcaster = Arc::new(WalletBroadcaster::from_env(
        &settings.operator.private_key_env,
        gateway.clone(),
    )?);
    let gas_oracle = Arc::new(ProviderFeeOracle::new(gateway.clone(), settings.gas.clone()));

    // Telemetry shipping
    let (telemetry, telemetry_rx) = Telemetry::channel(&settings.telemetry);
    let telemetry_handle = tokio::spawn(events::run_sink(telemetry_rx, Arc::new(TracingSink)));

    let ctx = DispatchContext::new(gateway.clone(), ledger);
    let sequencer = Arc::new(NonceSequencer::new(
        settings.cache.cleanup_interval,
        telemetry.clone(),
    ));
    let dispatcher = Arc::new(TransactionDispatcher::new(
        ctx,
        sequencer,
        classifier,
        broadcaster,
        gas_oracle,
        Arc::new(CodeAndMessagePredicate::new(
            settings.dispatch.nonce_race_codes.clone(),
        )),
        telemetry,
    ));
    info!("Dispatcher ready for operator {:?}", dispatcher.operator());

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Periodic compaction, independent of dispatch traffic
    let compaction_handle = if settings.dispatch.compaction_interval_secs > 0 {
        let dispatcher = dispatcher.clone();
        let interval = settings.dispatch.compaction_interval_secs;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(interval));
            loop {
                ticker.tick().await;
                match dispatcher.compact().await {
                    Ok(Some((from, to))) => info!("Compacted pending entries {}..={}", from, to),
                    Ok(None) => {}
                    Err(e) => warn!("Compaction sweep failed: {}", e),
                }
            }
        }))
    } else {
        None
    };

    info!("Operator dispatcher is running");
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Abort background tasks
    if let Some(h) = compaction_handle {
        h.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    // Dropping the last handle closes the telemetry queue; let it drain
    drop(dispatcher);
    match tokio::time::timeout(tokio::time::Duration::from_secs(5), telemetry_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Telemetry task ended abnormally: {}", e),
        Err(_) => warn!("Telemetry queue did not drain before shutdown"),
    }

    info!("Operator dispatcher stopped");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,operator_dispatcher=debug,hyper=warn"));

    let json = std::env::var("LOG_FORMAT").map_or(false, |v| v == "json");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
