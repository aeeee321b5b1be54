use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;

use xray_sync::config::{CliArgs, SyncConfig};
use xray_sync::logger::{self, log};
use xray_sync::store::{InboundStore, MemoryStore, SubscriptionStore};
use xray_sync::xray::{Reconciler, SystemctlControl, XrayApplier};

// Use mimalloc as the global allocator for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments and resolve the effective configuration
    let cli = CliArgs::parse_args();
    let config = SyncConfig::load(&cli)?;
    config.validate()?;

    // Initialize logger
    logger::init_logger(config.log_level);

    log::info!(
        xray_config = %config.xray_config_path.display(),
        service = %config.service,
        interval_secs = config.reconcile_interval.as_secs(),
        "Starting xray configuration sync agent"
    );

    // Shared resync channel: adapters bump it on every mutation, the
    // reconciler watches it, explicit apply-now triggers reuse it.
    let (resync_tx, _resync_rx) = watch::channel(0u64);
    let resync = Arc::new(resync_tx);

    // Storage backend and the typed adapters over it. The adapters are
    // the administrative layer's interface; the panel embedding this
    // agent mutates through them and through the reconciler trigger.
    let store = Arc::new(MemoryStore::new());
    let _inbounds = Arc::new(InboundStore::new(
        Arc::clone(&store) as _,
        Arc::clone(&resync),
    ));
    let _subscriptions = Arc::new(SubscriptionStore::new(
        Arc::clone(&store) as _,
        Arc::clone(&resync),
    ));

    // Applier owns the config file and the supervised process
    let applier = Arc::new(XrayApplier::new(
        config.xray_config_path.clone(),
        Arc::new(SystemctlControl::new(config.service.clone())) as _,
        config.restart_timeout,
    ));

    // The reconciler's first tick fires immediately, converging the live
    // process with the stored state at startup.
    let reconciler = Reconciler::new(
        store as _,
        config.security.clone(),
        applier,
        config.reconcile_interval,
        resync,
    );
    let handle = reconciler.start();

    // Wait for a shutdown signal
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => {
                log::info!("SIGINT received, shutting down...");
            }
            _ = sigterm.recv() => {
                log::info!("SIGTERM received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
        log::info!("Shutdown signal received...");
    }

    handle.shutdown().await;
    Ok(())
}
