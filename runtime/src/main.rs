//! Entry point: bring up logging, configuration, the handler registry,
//! netlink, and the device manager, then hand control to the event loop
//! until SIGINT/SIGTERM. Mirrors the bring-up order in
//! `examples/N10h0ggr-Gladix/user-agent/src/main.rs` (logger first, then
//! config, then the subsystems that depend on both).

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use runtime::config::ConfigManager;
use runtime::device::DeviceManager;
use runtime::handler::file::FileHandler;
use runtime::handler::registry::HandlerRegistry;
use runtime::netlink::NetlinkIntake;
use runtime::shutdown::ShutdownFlag;
use runtime::{eventloop, logger};

fn config_path() -> PathBuf {
    std::env::var_os("TCMU_RUNTIME_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/tcmu-runtime/config.toml"))
}

fn log_dir() -> PathBuf {
    std::env::var_os("TCMU_RUNTIME_LOG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/var/log/tcmu-runtime"))
}

fn main() -> Result<()> {
    let _logger_handle = logger::init(&log_dir()).context("initializing logger")?;

    let config_path = config_path();
    let (config, _watcher) = if config_path.exists() {
        let (manager, watcher) = ConfigManager::watch(&config_path).context("loading configuration")?;
        (manager, Some(watcher))
    } else {
        log::warn!("no config file at {}, using defaults", config_path.display());
        (ConfigManager::with_defaults(), None)
    };

    let registry = Arc::new(
        HandlerRegistry::builder()
            .register(Arc::new(FileHandler::new()))
            .context("registering handlers")?
            .build(),
    );

    let devices = Arc::new(DeviceManager::new(registry, config));
    if let Err(err) = devices.scan() {
        log::warn!("initial device scan failed: {err}");
    }
    let netlink = NetlinkIntake::connect().context("connecting to TCM-USER netlink family")?;
    let shutdown = Arc::new(ShutdownFlag::install().context("installing signal handlers")?);

    log::info!("tcmu-runtime starting");
    eventloop::run(devices, netlink, shutdown);
    log::info!("tcmu-runtime stopped");
    Ok(())
}
