// read configuration from toml file
use crate::network::StaticIpConfig;
use crate::network::multicast::MulticastOptions;
use crate::os::linux_rt::RtThreadConfig;
use crate::pubsub::RtLevel;
use crate::pubsub::connection::{NetworkAddressUrl, DEFAULT_ADDRESS_URL};
use anyhow::{Context, Result};
use config::Config;
use pnet::util::MacAddr;
use std::env;
use std::fmt::Display;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub sw_version: String,
    pub config_file_path: String,

    pub interface: String,
    pub ip_address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac_address: MacAddr,

    pub network_address_url: NetworkAddressUrl,
    pub publish_interval: Duration,
    pub rt_level: RtLevel,
    pub rt_core: Option<usize>,
    pub rt_priority: Option<i32>,
    pub multicast_ttl: u32,
    pub multicast_loop: bool,

    pub fault_log_interval: Duration,
    pub catalog_file: Option<String>,
    pub nodeset_file: Option<String>,
    pub status_leds: Vec<String>,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let settings = match Config::builder()
            .add_source(config::File::with_name("Config"))
            .build()
        {
            Ok(cfg) => cfg,
            Err(e) => {
                let current_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
                eprintln!("ERROR: Could not find or load Config.toml: {e}");
                eprintln!("       Current working directory: {}", current_dir.display());
                eprintln!("       Please ensure Config.toml exists in the current working directory.");
                return Err(e).context("Failed to load Config.toml");
            }
        };
        let config = Self::from_settings(&settings)?;
        println!("Loaded configuration from Config.toml");
        Ok(config)
    }

    /// Build from already-merged settings. Required keys must be present,
    /// optional keys fall back to the device defaults.
    pub fn from_settings(settings: &Config) -> Result<Self> {
        Ok(AppConfig {
            sw_version: required(settings, "sw_version")?,
            config_file_path: required(settings, "config_file_path")?,
            interface: required(settings, "interface")?,
            ip_address: parsed_or(settings, "ip_address", Ipv4Addr::new(192, 168, 1, 10))?,
            netmask: parsed_or(settings, "netmask", Ipv4Addr::new(255, 255, 255, 0))?,
            gateway: parsed_or(settings, "gateway", Ipv4Addr::new(192, 168, 1, 1))?,
            mac_address: parsed_or(settings, "mac_address", MacAddr::new(0x00, 0x0a, 0x35, 0x00, 0x12, 0x34))?,
            network_address_url: match settings.get_string("network_address_url") {
                Ok(val) => {
                    let url = val.parse::<NetworkAddressUrl>()?;
                    println!("✅ network_address_url: {}", url);
                    url
                }
                Err(_) => {
                    println!("⚠️  network_address_url not found, using default: {}", DEFAULT_ADDRESS_URL);
                    DEFAULT_ADDRESS_URL.parse::<NetworkAddressUrl>()?
                }
            },
            publish_interval: Duration::from_millis(nonzero_u64_or(settings, "publish_interval_ms", 1)?),
            rt_level: parsed_or(settings, "rt_level", RtLevel::default())?,
            rt_core: optional_parsed(settings, "rt_core")?,
            rt_priority: optional_parsed(settings, "rt_priority")?,
            multicast_ttl: parsed_or(settings, "multicast_ttl", 1u32)?,
            multicast_loop: parsed_or(settings, "multicast_loop", false)?,
            fault_log_interval: Duration::from_millis(nonzero_u64_or(settings, "fault_log_interval_ms", 1000)?),
            catalog_file: settings.get_string("catalog_file").ok(),
            nodeset_file: settings.get_string("nodeset_file").ok(),
            status_leds: match settings.get_array("status_leds") {
                Ok(values) => values
                    .into_iter()
                    .map(|v| v.into_string())
                    .collect::<Result<Vec<_>, _>>()
                    .context("'status_leds' must be a list of LED names")?,
                Err(_) => Vec::new(),
            },
        })
    }

    pub fn static_ip(&self) -> StaticIpConfig {
        StaticIpConfig {
            interface: self.interface.clone(),
            address: self.ip_address,
            netmask: self.netmask,
            gateway: self.gateway,
            mac: self.mac_address,
        }
    }

    pub fn multicast_options(&self) -> MulticastOptions {
        MulticastOptions {
            ttl: self.multicast_ttl,
            loopback: self.multicast_loop,
            interface: self.ip_address,
        }
    }

    /// `None` when neither a core nor a priority is configured.
    pub fn rt_thread(&self) -> Option<RtThreadConfig> {
        if self.rt_core.is_none() && self.rt_priority.is_none() {
            return None;
        }
        Some(RtThreadConfig {
            core: self.rt_core,
            priority: self.rt_priority,
            lock_memory: true,
        })
    }

    /// Resolve a file name relative to `config_file_path`.
    pub fn config_path(&self, file: &str) -> String {
        format!("{}{}", self.config_file_path, file)
    }
}

fn required(settings: &Config, key: &str) -> Result<String> {
    match settings.get_string(key) {
        Ok(val) => {
            println!("✅ {}: {}", key, val);
            Ok(val)
        }
        Err(e) => {
            eprintln!("ERROR: Missing or invalid '{}' in Config.toml: {}", key, e);
            Err(e).with_context(|| format!("Failed to read '{}' from Config.toml", key))
        }
    }
}

fn parsed_or<T>(settings: &Config, key: &str, default: T) -> Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    Ok(optional_parsed(settings, key)?.unwrap_or_else(|| {
        println!("⚠️  {} not found, using default: {}", key, default);
        default
    }))
}

fn optional_parsed<T>(settings: &Config, key: &str) -> Result<Option<T>>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match settings.get_string(key) {
        Ok(val) => match val.trim().parse::<T>() {
            Ok(parsed) => {
                println!("✅ {}: {}", key, parsed);
                Ok(Some(parsed))
            }
            Err(e) => anyhow::bail!("Invalid '{}' in Config.toml ({}): {}", key, val, e),
        },
        Err(_) => Ok(None),
    }
}

fn nonzero_u64_or(settings: &Config, key: &str, default: u64) -> Result<u64> {
    let val = parsed_or(settings, key, default)?;
    if val == 0 {
        anyhow::bail!("'{}' must be greater than zero", key);
    }
    Ok(val)
}
