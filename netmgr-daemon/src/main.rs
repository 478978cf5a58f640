//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

#![warn(rust_2018_idioms)]

mod config;

use std::path::PathBuf;
use std::process;

use clap::{App, Arg};
use config::Config;
use nix::unistd::Uid;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::prelude::*;

use netmgr_interface::Master;
use netmgr_system::{System, events};

fn init_tracing(config: &config::Logging) {
    let log_level_filter = LevelFilter::from_level(tracing::Level::TRACE);

    // Enable logging to a file.
    let file = config.file.enabled.then(|| {
        let file_appender = rolling::never(&config.file.dir, &config.file.name);
        tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(false)
            .with_ansi(false)
            .boxed()
            .with_filter(log_level_filter)
    });

    // Enable logging to stdout.
    let stdout = config.stdout.enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .boxed()
            .with_filter(log_level_filter)
    });

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive("netmgr=debug".parse().unwrap())
        .from_env_lossy();
    tracing_subscriber::registry()
        .with(env_filter)
        .with(file)
        .with(stdout)
        .init();
}

async fn run(config: Config) {
    // Kernel endpoints; a failure here is fatal.
    let system = match System::init() {
        Ok(system) => system,
        Err(error) => {
            error!(%error, "failed to initialize kernel interfaces");
            process::exit(1);
        }
    };
    let (handle, link_rx) = match events::link_monitor() {
        Ok(monitor) => monitor,
        Err(error) => {
            error!(%error, "failed to create the link event socket");
            process::exit(1);
        }
    };
    let hotplug_rx = match events::hotplug_listener() {
        Ok(listener) => listener,
        Err(error) => {
            error!(%error, "failed to create the hotplug event socket");
            process::exit(1);
        }
    };

    let mut master = Master::new(system, PathBuf::from(&config.resolv_conf));
    config::apply(&mut master, &config);

    // Prime device state from the kernel, then bring everything up.
    master.fetch_links(&handle).await;
    master.start();

    master.run(link_rx, hotplug_rx).await;
}

// ===== main =====

fn main() {
    // Parse command-line parameters.
    let matches = App::new("Network interface management daemon")
        .version(clap::crate_version!())
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
    let config = Config::load(config_file);

    // Check for root privileges.
    if !Uid::effective().is_root() {
        eprintln!("need privileged user");
        process::exit(1);
    }

    // Initialize tracing.
    init_tracing(&config.logging);

    // Set panic handler to abort the process if any spawned task panics.
    let default_panic = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_panic(info);
        process::exit(1);
    }));

    // We're ready to go!
    info!("starting up");

    // The daemon is a single-threaded cooperative event loop.
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(async {
            run(config).await;
        });

    info!("exiting");
}
