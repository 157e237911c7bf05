//! Device options.
//!
//! [`DeviceConfig`] is the serializable form an accessory layer loads from
//! JSON; [`DeviceBuilder`] is the programmatic form. Both produce a
//! [`Device`].

use crate::crypto::CodecKey;
use crate::device::Device;
use crate::error::{GreeError, Result};
use crate::params::ParameterTable;
use crate::protocol::DEFAULT_DEVICE_PORT;
use crate::scheduler::{
    DEFAULT_BIND_RETRY, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_MISSED_POLLS, DEFAULT_POLL_INTERVAL,
    RetryPolicy,
};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// First local port of the legacy `8000 + last octet` scheme.
const LEGACY_PORT_BASE: u16 = 8000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeviceConfig {
    /// IP address of the unit, or `255.255.255.255` to discover any unit
    pub host: String,
    /// Local UDP port; 0 picks an ephemeral one
    pub port: u16,
    pub device_port: u16,
    /// Poll interval in milliseconds
    pub update_interval: u64,
    pub handshake_timeout: u64,
    pub bind_retry: u64,
    pub max_missed_polls: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::BROADCAST.to_string(),
            port: 0,
            device_port: DEFAULT_DEVICE_PORT,
            update_interval: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT.as_millis() as u64,
            bind_retry: DEFAULT_BIND_RETRY.as_millis() as u64,
            max_missed_polls: DEFAULT_MAX_MISSED_POLLS,
        }
    }
}

impl DeviceConfig {
    /// Defaults for `host` with the local port set to `8000 + last octet`,
    /// so several units on one machine never share a socket.
    pub fn for_host_octet(host: IpAddr) -> Self {
        let octet = match host {
            IpAddr::V4(v4) => v4.octets()[3],
            IpAddr::V6(v6) => v6.octets()[15],
        };
        Self {
            host: host.to_string(),
            port: LEGACY_PORT_BASE + u16::from(octet),
            ..Self::default()
        }
    }

    pub fn builder(&self) -> Result<DeviceBuilder> {
        let host: IpAddr = self
            .host
            .parse()
            .map_err(|_| GreeError::InvalidArgument(format!("invalid host {:?}", self.host)))?;
        Ok(DeviceBuilder::new(host)
            .local_port(self.port)
            .device_port(self.device_port)
            .poll_interval(Duration::from_millis(self.update_interval))
            .handshake_timeout(Duration::from_millis(self.handshake_timeout))
            .bind_retry(Duration::from_millis(self.bind_retry))
            .max_missed_polls(self.max_missed_polls))
    }
}

/// Fluent construction of a [`Device`].
///
/// ```no_run
/// # async fn run() -> rustgree::Result<()> {
/// use rustgree::DeviceBuilder;
/// use std::time::Duration;
///
/// let device = DeviceBuilder::new([192, 168, 1, 40])
///     .poll_interval(Duration::from_secs(5))
///     .build()?;
/// device.start()?;
/// device.connected().await?;
/// device.set_power(true).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct DeviceBuilder {
    pub(crate) host: IpAddr,
    pub(crate) local_port: u16,
    pub(crate) device_port: u16,
    pub(crate) poll_interval: Duration,
    pub(crate) retry: RetryPolicy,
    pub(crate) default_key: CodecKey,
    pub(crate) params: ParameterTable,
}

impl DeviceBuilder {
    pub fn new(host: impl Into<IpAddr>) -> Self {
        Self {
            host: host.into(),
            local_port: 0,
            device_port: DEFAULT_DEVICE_PORT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
            default_key: CodecKey::default(),
            params: ParameterTable::default(),
        }
    }

    pub fn local_port(mut self, port: u16) -> Self {
        self.local_port = port;
        self
    }

    pub fn device_port(mut self, port: u16) -> Self {
        self.device_port = port;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.retry.handshake_timeout = timeout;
        self
    }

    pub fn bind_retry(mut self, delay: Duration) -> Self {
        self.retry.bind_retry = delay;
        self
    }

    /// Unanswered polls tolerated before rediscovery; 0 disables the check.
    pub fn max_missed_polls(mut self, count: u32) -> Self {
        self.retry.max_missed_polls = count;
        self
    }

    /// Key used before binding. Only test rigs need to change it.
    pub fn default_key(mut self, key: CodecKey) -> Self {
        self.default_key = key;
        self
    }

    pub fn parameters(mut self, params: ParameterTable) -> Self {
        self.params = params;
        self
    }

    pub fn build(self) -> Result<Device> {
        if self.poll_interval.is_zero() {
            return Err(GreeError::InvalidArgument(
                "poll interval must be non-zero".into(),
            ));
        }
        if self.retry.handshake_timeout.is_zero() {
            return Err(GreeError::InvalidArgument(
                "handshake timeout must be non-zero".into(),
            ));
        }
        if self.device_port == 0 {
            return Err(GreeError::InvalidArgument(
                "device port must be non-zero".into(),
            ));
        }
        Ok(Device::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_json_with_defaults() {
        let config: DeviceConfig = serde_json::from_str(
            r#"{"host": "192.168.1.40", "updateInterval": 5000, "maxMissedPolls": 0}"#,
        )
        .unwrap();
        assert_eq!(config.host, "192.168.1.40");
        assert_eq!(config.update_interval, 5000);
        assert_eq!(config.max_missed_polls, 0);
        assert_eq!(config.port, 0);
        assert_eq!(config.device_port, 7000);
        assert_eq!(config.handshake_timeout, 10_000);
        assert_eq!(config.bind_retry, 5_000);
    }

    #[test]
    fn default_targets_broadcast() {
        let config = DeviceConfig::default();
        assert_eq!(config.host, "255.255.255.255");
        assert_eq!(config.update_interval, 10_000);
    }

    #[test]
    fn legacy_port_from_last_octet() {
        let config = DeviceConfig::for_host_octet("192.168.1.40".parse().unwrap());
        assert_eq!(config.port, 8040);
        assert_eq!(config.host, "192.168.1.40");
    }

    #[test]
    fn builder_from_config() {
        let config = DeviceConfig {
            host: "10.0.0.9".into(),
            port: 8009,
            update_interval: 2500,
            ..DeviceConfig::default()
        };
        let builder = config.builder().unwrap();
        assert_eq!(builder.host, IpAddr::from([10, 0, 0, 9]));
        assert_eq!(builder.local_port, 8009);
        assert_eq!(builder.poll_interval, Duration::from_millis(2500));
        assert_eq!(builder.retry, RetryPolicy::default());
    }

    #[test]
    fn rejects_bad_host_and_zero_interval() {
        let config = DeviceConfig {
            host: "not-an-address".into(),
            ..DeviceConfig::default()
        };
        assert!(matches!(
            config.builder(),
            Err(GreeError::InvalidArgument(_))
        ));
        assert!(matches!(
            DeviceBuilder::new([127, 0, 0, 1])
                .poll_interval(Duration::ZERO)
                .build(),
            Err(GreeError::InvalidArgument(_))
        ));
    }
}
