use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use crate::router::RouterOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterConfig {
    pub simulated_address: Ipv4Addr,
    /// Host other routers dial. Discovered from the interfaces when absent.
    #[serde(default)]
    pub process_address: Option<String>,
    #[serde(default = "default_process_port")]
    pub process_port: u16,
    /// How many consecutive ports to try when `process_port` is taken.
    #[serde(default = "default_port_search")]
    pub port_search: u16,
    #[serde(default = "default_exchange_timeout_ms")]
    pub exchange_timeout_ms: u64,
    #[serde(default)]
    pub refresh_interval_secs: Option<u64>,
}

fn default_process_port() -> u16 {
    10000
}

fn default_port_search() -> u16 {
    100
}

fn default_exchange_timeout_ms() -> u64 {
    5000
}

impl RouterConfig {
    pub fn new(simulated_address: Ipv4Addr) -> Self {
        Self {
            simulated_address,
            process_address: None,
            process_port: default_process_port(),
            port_search: default_port_search(),
            exchange_timeout_ms: default_exchange_timeout_ms(),
            refresh_interval_secs: None,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        let config: RouterConfig = serde_json::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.simulated_address.is_unspecified() {
            bail!("simulated_address must not be 0.0.0.0");
        }
        if self.exchange_timeout_ms == 0 {
            bail!("exchange_timeout_ms must be positive");
        }
        if self.refresh_interval_secs == Some(0) {
            bail!("refresh_interval_secs must be positive when set");
        }
        Ok(())
    }

    /// Ports the bootstrap tries, in order.
    pub fn candidate_ports(&self) -> impl Iterator<Item = u16> + use<> {
        let first = self.process_port;
        (0..self.port_search.max(1)).map_while(move |offset| first.checked_add(offset))
    }

    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            exchange_timeout: Duration::from_millis(self.exchange_timeout_ms),
            refresh_interval: self.refresh_interval_secs.map(Duration::from_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn minimal_file_takes_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("router.json");
        fs::write(&path, r#"{ "simulated_address": "10.0.0.1" }"#).unwrap();

        let config = RouterConfig::load(&path).unwrap();
        assert_eq!(config, RouterConfig::new(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(config.router_options().exchange_timeout, Duration::from_secs(5));
        assert!(config.router_options().refresh_interval.is_none());
    }

    #[test]
    fn save_then_load_preserves_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("router.json");
        let config = RouterConfig {
            process_address: Some("192.168.1.20".to_string()),
            process_port: 12000,
            refresh_interval_secs: Some(30),
            ..RouterConfig::new(Ipv4Addr::new(10, 0, 0, 7))
        };

        config.save(&path).unwrap();
        assert_eq!(RouterConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn rejects_unspecified_address_and_zero_timeout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("router.json");

        fs::write(&path, r#"{ "simulated_address": "0.0.0.0" }"#).unwrap();
        assert!(RouterConfig::load(&path).is_err());

        fs::write(&path, r#"{ "simulated_address": "10.0.0.1", "exchange_timeout_ms": 0 }"#).unwrap();
        assert!(RouterConfig::load(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(RouterConfig::load(dir.path().join("absent.json")).is_err());
    }

    #[test]
    fn candidate_ports_stop_at_u16_max() {
        let config = RouterConfig {
            process_port: u16::MAX - 1,
            port_search: 10,
            ..RouterConfig::new(Ipv4Addr::new(10, 0, 0, 1))
        };
        assert_eq!(config.candidate_ports().collect::<Vec<_>>(), vec![u16::MAX - 1, u16::MAX]);

        let single = RouterConfig {
            port_search: 0,
            ..RouterConfig::new(Ipv4Addr::new(10, 0, 0, 1))
        };
        assert_eq!(single.candidate_ports().collect::<Vec<_>>(), vec![10000]);
    }
}
