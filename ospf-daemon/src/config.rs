//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::time::Duration;

use ipnetwork::Ipv4Network;
use ospf_engine::northbound::{AreaCfg, GlobalCfg, InterfaceCfg};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    pub logging: Logging,
    pub inventory: Inventory,
    pub ospf: GlobalCfg,
    pub areas: Vec<AreaCfg>,
    pub interfaces: Vec<InterfaceCfg>,
    pub external_routes: Vec<ExternalRoute>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Logging {
    pub file: LoggingFile,
    pub stdout: LoggingStdout,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFile {
    pub enabled: bool,
    pub dir: String,
    pub name: String,
    pub rotation: LoggingFileRotation,
    #[serde(flatten)]
    pub fmt: LoggingFmt,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingStdout {
    pub enabled: bool,
    #[serde(flatten)]
    pub fmt: LoggingFmt,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingFmt {
    pub style: LoggingFmtStyle,
    pub colors: bool,
    pub show_thread_id: bool,
    pub show_source: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFileRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingFmtStyle {
    Compact,
    Full,
    Json,
    Pretty,
}

// System interface discovery.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Inventory {
    // Interval between two scans of the system interfaces, in seconds.
    pub scan_interval: u64,
}

// Static route redistributed as an AS-external route.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExternalRoute {
    pub prefix: Ipv4Network,
    pub metric: u32,
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(String, toml::de::Error),
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/ospfd.toml";

    pub(crate) fn load(
        config_file: Option<&str>,
    ) -> Result<Config, ConfigError> {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        match std::fs::read_to_string(config_file) {
            Ok(config_str) => Config::parse(&config_str).map_err(|error| {
                ConfigError::Parse(config_file.to_owned(), error)
            }),
            Err(err) => {
                eprintln!("Failed to load configuration file: {err}");
                eprintln!("Falling back to default configuration...");
                Ok(Config::default())
            }
        }
    }

    pub(crate) fn parse(config_str: &str) -> Result<Config, toml::de::Error> {
        toml::from_str(config_str)
    }
}

impl Default for Config {
    fn default() -> Config {
        Config {
            logging: Default::default(),
            inventory: Default::default(),
            ospf: Default::default(),
            areas: Default::default(),
            interfaces: Default::default(),
            external_routes: Default::default(),
        }
    }
}

// ===== impl LoggingFile =====

impl Default for LoggingFile {
    fn default() -> LoggingFile {
        LoggingFile {
            enabled: false,
            dir: "/var/log".to_owned(),
            name: "ospfd.log".to_owned(),
            rotation: Default::default(),
            fmt: Default::default(),
        }
    }
}

// ===== impl LoggingStdout =====

impl Default for LoggingStdout {
    fn default() -> LoggingStdout {
        LoggingStdout {
            enabled: true,
            fmt: Default::default(),
        }
    }
}

// ===== impl LoggingFmt =====

impl Default for LoggingFmt {
    fn default() -> LoggingFmt {
        LoggingFmt {
            style: LoggingFmtStyle::Full,
            colors: false,
            show_thread_id: false,
            show_source: false,
        }
    }
}

// ===== impl Inventory =====

impl Inventory {
    pub(crate) fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval.max(1))
    }
}

impl Default for Inventory {
    fn default() -> Inventory {
        Inventory { scan_interval: 5 }
    }
}

// ===== impl ConfigError =====

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Parse(path, error) => {
                write!(f, "failed to parse configuration file {path}: {error}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use ospf_engine::interface::InterfaceType;

    use super::*;

    #[test]
    fn parse_full_config() {
        let config = Config::parse(
            r#"
            [logging.stdout]
            style = "json"
            colors = true

            [ospf]
            router-id = "1.1.1.1"
            asbr = true

            [[areas]]
            area-id = "0.0.0.0"

            [[areas]]
            area-id = "0.0.0.1"
            import-external = false

            [[interfaces]]
            ip-address = "10.0.1.1"
            area-id = "0.0.0.0"
            if-type = "point-to-point"
            cost = 5

            [[external-routes]]
            prefix = "172.16.0.0/16"
            metric = 100
            "#,
        )
        .unwrap();

        let style = &config.logging.stdout.fmt.style;
        assert!(matches!(style, LoggingFmtStyle::Json));
        assert!(config.logging.stdout.fmt.colors);
        assert_eq!(config.ospf.router_id, Ipv4Addr::new(1, 1, 1, 1));
        assert!(config.ospf.asbr);
        assert_eq!(config.areas.len(), 2);
        assert!(config.areas[0].import_external);
        assert!(config.areas[1].is_stub());
        let iface = &config.interfaces[0];
        assert_eq!(iface.if_type, InterfaceType::PointToPoint);
        assert_eq!(iface.cost, 5);
        assert_eq!(iface.hello_interval, 10);
        assert_eq!(iface.dead_interval, 40);
        assert_eq!(config.external_routes[0].metric, 100);
    }

    #[test]
    fn parse_empty_config() {
        let config = Config::parse("").unwrap();
        assert!(config.logging.stdout.enabled);
        assert!(!config.logging.file.enabled);
        assert_eq!(config.inventory.scan_interval(), Duration::from_secs(5));
        assert!(config.areas.is_empty());
    }

    #[test]
    fn parse_invalid_config() {
        // Unknown section.
        assert!(Config::parse("[logging]\njournald = true\n").is_err());
        // Missing metric.
        let config = "[[external-routes]]\nprefix = \"10.0.0.0/8\"\n";
        assert!(Config::parse(config).is_err());
        // Malformed prefix.
        let config =
            "[[external-routes]]\nprefix = \"10.0.0.0/33\"\nmetric = 1\n";
        assert!(Config::parse(config).is_err());
    }
}
