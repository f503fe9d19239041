use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rs_lib_block_scanner::{
    api,
    chains::evm::{bloom::CompiledFilter, client::EvmChainClient},
    cli::{Cli, Commands},
    config::AppConfig,
    core::{scanner::Scanner, scheduler::SchedulerHandle},
    storage::sink::RocksDbSink,
    utils::{
        logger::init_logger,
        metrics::{PrometheusScanMetrics, install_prometheus_exporter},
    },
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    let cfg = AppConfig::load(&args.config)?;
    let scan_config = cfg.scan_config()?;

    if let Some(Commands::Check) = args.command {
        CompiledFilter::compile_all(scan_config.listeners())
            .context("Invalid listener configuration")?;
        println!("{:#?}", scan_config);
        println!("loop skip threshold: {}", scan_config.loop_skip_threshold());
        return Ok(());
    }

    init_logger(&cfg.logging);

    info!("✅ Configuration load successful");
    info!(chain = %cfg.scanner.chain_type, "Chain type configuration");
    info!(chain_name = %cfg.scanner.chain_name, "Chain name");
    info!(start_height = scan_config.start_height(), "Start height");
    info!(rpc_url = %cfg.rpc.url, "RPC node");

    if cfg.metrics.enable {
        install_prometheus_exporter(cfg.metrics.prometheus_exporter_port)?;
        info!(
            port = cfg.metrics.prometheus_exporter_port,
            "📊 Prometheus exporter installed"
        );
    }

    match cfg.scanner.chain_type.as_str() {
        "evm" => {
            info!("🚀 Starting EVM block scanner...");

            let client = Arc::new(
                EvmChainClient::new(
                    &cfg.rpc.url,
                    scan_config.page_size(),
                    cfg.scanner.confirm_blocks,
                    cfg.rpc.retry(),
                )?
                .with_listeners(scan_config.listeners())
                .context("Invalid listener configuration")?,
            );
            let sink = RocksDbSink::open(
                &cfg.storage.path,
                cfg.storage.compression,
                cfg.scanner.chain_name.clone(),
            )?;
            info!("✅ Storage opened at: {}", cfg.storage.path);

            let mut scanner = Scanner::new(client, sink, scan_config);
            if cfg.metrics.enable {
                scanner = scanner.with_metrics(Arc::new(PrometheusScanMetrics::new(
                    cfg.scanner.chain_name.clone(),
                )));
            }

            let api_shutdown = CancellationToken::new();
            let api_task = if cfg.api.enable {
                let watcher = scanner.status_watcher();
                let listen_addr = cfg.api.listen_addr.clone();
                let token = api_shutdown.clone();
                Some(tokio::spawn(async move {
                    let shutdown = async move { token.cancelled().await };
                    if let Err(e) = api::serve(&listen_addr, watcher, shutdown).await {
                        error!(error = %e, "❌ Status API failed");
                    }
                }))
            } else {
                None
            };

            spawn_signal_handlers(scanner.scheduler_handle());
            info!("💡 Press Ctrl+C to stop gracefully");

            let outcome = scanner.start().await;

            api_shutdown.cancel();
            if let Some(task) = api_task {
                let _ = task.await;
            }

            match outcome {
                Ok(()) => info!("✨ Scanner exited successfully"),
                Err(e) => {
                    error!(phase = %scanner.scan_phase(), "❌ Scanner exited with error");
                    return Err(e.into());
                }
            }
        }
        other => {
            warn!("⚠️ Unknown chain type: {}", other);
        }
    }

    Ok(())
}

/// Ctrl+C and SIGTERM end the scheduler; the running tick completes first.
fn spawn_signal_handlers(handle: SchedulerHandle) {
    let on_ctrl_c = handle.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("📡 Received shutdown signal (Ctrl+C)");
        on_ctrl_c.end_timer();
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        tokio::spawn(async move {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                info!("📡 Received SIGTERM signal");
                handle.end_timer();
            }
        });
    }
}
