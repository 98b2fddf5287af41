// start of the program: initialize configuration and logging
use crate::os::config::AppConfig;
use crate::os::logs::{init_console_logging, init_logging};
use anyhow::{Context, Result};
use log::{LevelFilter, info};

/// Load `Config.toml` and bring up logging. Only a missing or invalid
/// configuration is fatal.
pub fn start() -> Result<AppConfig> {
    let config = AppConfig::load().context("Failed to load application configuration")?;
    println!("✅ Configuration loaded successfully");

    // logging failures are reported but not fatal
    let log_config_path = config.config_path("logging_config.yaml");
    if let Err(e) = init_logging(&log_config_path) {
        eprintln!("WARNING: Could not find or load {log_config_path}: {e:#}");
        eprintln!("         Falling back to console logging.");
        if let Err(e) = init_console_logging(LevelFilter::Info) {
            eprintln!("WARNING: Console logging unavailable: {e:#}");
        }
    }

    info!("Application version: {}", config.sw_version);
    info!(
        "Interface {}: {}/{} gw {} mac {}",
        config.interface, config.ip_address, config.netmask, config.gateway, config.mac_address
    );
    info!(
        "Publishing to {} every {:?} (rt_level {})",
        config.network_address_url, config.publish_interval, config.rt_level
    );
    Ok(config)
}
