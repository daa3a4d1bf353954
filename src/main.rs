#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # modemd
//!
//! Cellular modem control daemon: drives an AT-command modem over a serial
//! line, exposes its status and controls on `com.victronenergy.modem`, and
//! brings a PPP link up or down in response to registration state and
//! settings changes.

use std::time::Instant;

use clap::Parser;
use tracing::{error, info};

use modemd::bus;
use modemd::config::Config;
use modemd::engine::{self, Intent, SettingsWriteBack};
use modemd::settings::SettingsClient;

/// Cellular modem control daemon.
#[derive(Parser)]
#[command(name = "modemd", version)]
struct Cli {
    /// Serial device the modem is attached to.
    #[arg(short = 's', long = "serial")]
    serial: String,
    /// Enable debug logging.
    #[arg(short = 'd', long = "debug")]
    debug: bool,
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() {
    let start = Instant::now();
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref());
    config.device.serial = cli.serial;
    if cli.debug {
        config.logging.level = "debug".to_string();
    }

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("modemd v{} starting on {}", env!("CARGO_PKG_VERSION"), config.device.serial);

    let settings_client = match SettingsClient::connect().await {
        Ok(c) => c,
        Err(e) => {
            error!("failed to connect to settings service: {e}");
            std::process::exit(1);
        }
    };
    let settings = settings_client.sync().await;
    let ppp_config = config.ppp.to_ppp_config();
    let engine_config = config.engine.to_engine_config();

    let (writeback_tx, mut writeback_rx) = tokio::sync::mpsc::channel(8);
    let (handle, ready_rx, engine_join) = match engine::spawn(
        &config.device.serial,
        settings,
        ppp_config,
        engine_config,
        writeback_tx,
    ) {
        Ok(v) => v,
        Err(e) => {
            error!("failed to start engine on {}: {e}", config.device.serial);
            std::process::exit(1);
        }
    };

    let writeback_client = settings_client.clone();
    let writeback_task = tokio::spawn(async move {
        while let Some(msg) = writeback_rx.recv().await {
            match msg {
                SettingsWriteBack::ClearPin => writeback_client.clear_pin().await,
            }
        }
    });

    if ready_rx.await.is_ok() {
        info!("modem initialized, now running");
    }

    let bus_handle = handle.clone();
    let shutdown = handle.shutdown.clone();
    let bus_task = tokio::spawn(async move {
        if let Err(e) = bus::serve(bus_handle, settings_client).await {
            error!("bus service exited: {e}");
        }
    });

    let signal_wait = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("received SIGINT"),
                _ = sigterm.recv() => info!("received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("received SIGINT");
        }
    };

    tokio::select! {
        _ = signal_wait => {
            handle.send(Intent::Shutdown);
        }
        () = shutdown.wait() => {
            error!("modem engine exited unexpectedly");
        }
    }

    bus_task.abort();
    writeback_task.abort();
    let _ = engine_join.join();

    info!("modemd exiting after {:.0}s", start.elapsed().as_secs_f64());
    std::process::exit(1);
}
