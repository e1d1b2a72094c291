//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod config;
mod network;
mod southbound;

use std::sync::Arc;

use clap::{App, Arg};
use config::{Config, LoggingFileRotation, LoggingFmtStyle};
use network::RawSocketDriver;
use nix::unistd::Uid;
use ospf_engine::instance::InstanceHandle;
use ospf_engine::southbound::SouthboundMsg;
use southbound::{Inventory, LogRouteSink};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

fn init_tracing(config: &config::Logging) {
    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = match config.file.rotation {
            LoggingFileRotation::Never => {
                rolling::never(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Hourly => {
                rolling::hourly(&config.file.dir, &config.file.name)
            }
            LoggingFileRotation::Daily => {
                rolling::daily(&config.file.dir, &config.file.name)
            }
        };

        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_thread_ids(config.file.fmt.show_thread_id)
            .with_file(config.file.fmt.show_source)
            .with_line_number(config.file.fmt.show_source)
            .with_ansi(config.file.fmt.colors);
        let layer = match config.file.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);
        let layer = tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(config.stdout.fmt.show_thread_id)
            .with_file(config.stdout.fmt.show_source)
            .with_line_number(config.stdout.fmt.show_source)
            .with_ansi(config.stdout.fmt.colors);
        let layer = match config.stdout.fmt.style {
            LoggingFmtStyle::Compact => layer.compact().boxed(),
            LoggingFmtStyle::Full => layer.boxed(),
            LoggingFmtStyle::Json => layer.json().boxed(),
            LoggingFmtStyle::Pretty => layer.pretty().boxed(),
        };
        layer.with_filter(log_level_filter)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("ospf=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file)
        .with(stdout)
        .init();
}

fn signal_listener() -> mpsc::Receiver<()> {
    let (signal_tx, signal_rx) = mpsc::channel(1);

    tokio::task::spawn(async move {
        let (mut sigint, mut sigterm) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(error), _) | (_, Err(error)) => {
                error!(%error, "failed to install signal handlers");
                let _ = signal_tx.send(()).await;
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT");
                let _ = signal_tx.send(()).await;
            },
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                let _ = signal_tx.send(()).await;
            }
        }
    });

    signal_rx
}

// Pushes the static configuration down to the instance.
async fn apply_config(handle: &InstanceHandle, config: &Config) {
    if let Err(error) = handle.create_global(config.ospf.clone()).await {
        error!(%error, "failed to apply global configuration");
        return;
    }
    for area in &config.areas {
        if let Err(error) = handle.create_area(area.clone()).await {
            error!(area_id = %area.area_id, %error, "failed to create area");
        }
    }
    for iface in &config.interfaces {
        if let Err(error) = handle.create_interface(iface.clone()).await {
            error!(
                address = %iface.ip_address, %error,
                "failed to create interface"
            );
        }
    }

    // Static routes redistributed into OSPF.
    let sbp = handle.southbound();
    for route in &config.external_routes {
        let msg = SouthboundMsg::ExternalRouteAdd {
            prefix: route.prefix,
            metric: route.metric,
        };
        let _ = sbp.send(msg);
    }
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("OSPFv2 routing daemon")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("file")
                .help("Specify an alternative configuration file."),
        )
        .get_matches();

    // Read configuration file.
    let config_file = matches.value_of("config");
    let config = match Config::load(config_file) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    // Check for root privileges.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        std::process::exit(1);
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // We're ready to go!
    info!("starting up");

    // Main loop.
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            error!(%error, "failed to create async runtime");
            std::process::exit(1);
        }
    };
    runtime.block_on(async {
        // Spawn signal listener.
        let mut signal_rx = signal_listener();

        // Start the OSPF instance.
        let driver = Arc::new(RawSocketDriver);
        let sink = Arc::new(LogRouteSink);
        let handle = InstanceHandle::spawn(driver, sink);

        // Feed the instance with the system interfaces. The first scan is
        // done before applying the configuration so that interfaces can be
        // matched to their links.
        let sbp = handle.southbound();
        let mut inventory = Inventory::default();
        match southbound::scan() {
            Ok(links) => {
                for msg in inventory.update(links) {
                    let _ = sbp.send(msg);
                }
            }
            Err(error) => {
                error!(%error, "failed to scan system interfaces");
            }
        }
        let _inventory_task = southbound::inventory_task(
            config.inventory.scan_interval(),
            inventory,
            sbp,
        );

        apply_config(&handle, &config).await;

        // Run until a termination signal is received.
        let _ = signal_rx.recv().await;
        handle.shutdown().await;
    });

    info!("exiting");
}
