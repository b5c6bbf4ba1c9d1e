//! Configuration types for the cache client.

use crate::types::HostEndpoint;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Main configuration for the cache client.
///
/// The settings record is a plain struct: loading it from a file or an
/// environment is the embedding application's concern.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Initial fleet of cache hosts.
    pub cache_hosts: Vec<HostEndpoint>,

    /// Extra replicas per bucket. Bucket width is `layers + 1`.
    pub host_redundancy_layers: usize,

    /// Interval between reconnection attempts for a disconnected host.
    pub host_reconnect_interval: Duration,

    /// Per-request timeout for host RPCs.
    pub communication_timeout: Duration,

    /// Timeout for establishing a TCP connection to a host.
    pub connect_timeout: Duration,

    /// Initial size of the per-connection write buffer, in bytes.
    pub message_buffer_size: usize,

    /// Largest frame the client will accept from a host, in KB.
    pub maximum_message_size_kb: usize,

    /// Enable the UDP multicast discovery listener.
    pub auto_detect_cache_hosts: bool,

    /// Multicast group to join. Required when auto-detection is on.
    pub udp_multicast_ip: Option<String>,

    /// Multicast port to listen on. Required when auto-detection is on.
    pub udp_multicast_port: Option<u16>,

    /// Overall deadline for a single facade operation. `None` retries
    /// until the fleet is exhausted, matching the classic behavior.
    pub operation_deadline: Option<Duration>,

    /// Pause between routing retries after a transport failure.
    pub retry_delay: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_hosts: Vec::new(),
            host_redundancy_layers: 0,
            host_reconnect_interval: Duration::from_secs(10),
            communication_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            message_buffer_size: 4096,
            maximum_message_size_kb: 1024,
            auto_detect_cache_hosts: false,
            udp_multicast_ip: None,
            udp_multicast_port: None,
            operation_deadline: None,
            retry_delay: Duration::from_millis(100),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for the given fleet.
    pub fn new(cache_hosts: Vec<HostEndpoint>) -> Self {
        Self {
            cache_hosts,
            ..Default::default()
        }
    }

    /// Set the number of redundancy layers.
    pub fn with_redundancy_layers(mut self, layers: usize) -> Self {
        self.host_redundancy_layers = layers;
        self
    }

    /// Set the host reconnect interval.
    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.host_reconnect_interval = interval;
        self
    }

    /// Set the per-request communication timeout.
    pub fn with_communication_timeout(mut self, timeout: Duration) -> Self {
        self.communication_timeout = timeout;
        self
    }

    /// Set the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the write buffer size in bytes.
    pub fn with_message_buffer_size(mut self, bytes: usize) -> Self {
        self.message_buffer_size = bytes;
        self
    }

    /// Set the maximum accepted frame size in KB.
    pub fn with_maximum_message_size_kb(mut self, kb: usize) -> Self {
        self.maximum_message_size_kb = kb;
        self
    }

    /// Enable multicast auto-discovery on the given group and port.
    pub fn with_auto_discovery(mut self, multicast_ip: impl Into<String>, port: u16) -> Self {
        self.auto_detect_cache_hosts = true;
        self.udp_multicast_ip = Some(multicast_ip.into());
        self.udp_multicast_port = Some(port);
        self
    }

    /// Set an overall per-operation deadline.
    pub fn with_operation_deadline(mut self, deadline: Duration) -> Self {
        self.operation_deadline = Some(deadline);
        self
    }

    /// Set the pause between routing retries.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.message_buffer_size == 0 {
            return Err("message_buffer_size must be greater than zero".to_string());
        }
        if self.maximum_message_size_kb == 0 {
            return Err("maximum_message_size_kb must be greater than zero".to_string());
        }
        if self.auto_detect_cache_hosts {
            let ip = self
                .udp_multicast_ip
                .as_deref()
                .ok_or("udp_multicast_ip is required when auto-detection is enabled")?;
            self.udp_multicast_port
                .ok_or("udp_multicast_port is required when auto-detection is enabled")?;

            let parsed: Ipv4Addr = ip
                .parse()
                .map_err(|_| format!("udp_multicast_ip is not a valid IPv4 address: {ip}"))?;
            if !parsed.is_multicast() {
                return Err(format!("udp_multicast_ip is not a multicast address: {ip}"));
            }
        }
        Ok(())
    }

    /// Parse the configured multicast group.
    ///
    /// Only meaningful after `validate()`; returns `None` when
    /// auto-detection is disabled.
    pub(crate) fn multicast_group(&self) -> Option<(Ipv4Addr, u16)> {
        let ip = self.udp_multicast_ip.as_deref()?.parse().ok()?;
        let port = self.udp_multicast_port?;
        Some((ip, port))
    }

    /// Maximum accepted frame size in bytes.
    pub(crate) fn maximum_message_size(&self) -> usize {
        self.maximum_message_size_kb * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.host_redundancy_layers, 0);
        assert!(!config.auto_detect_cache_hosts);
        assert!(config.operation_deadline.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auto_discovery_requires_group() {
        let mut config = ClientConfig::default();
        config.auto_detect_cache_hosts = true;
        assert!(config.validate().is_err());

        config.udp_multicast_ip = Some("224.0.0.251".to_string());
        assert!(config.validate().is_err());

        config.udp_multicast_port = Some(5000);
        assert!(config.validate().is_ok());
        assert_eq!(
            config.multicast_group(),
            Some(("224.0.0.251".parse().unwrap(), 5000))
        );
    }

    #[test]
    fn test_rejects_non_multicast_group() {
        let config = ClientConfig::default().with_auto_discovery("10.0.0.1", 5000);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_chain() {
        let config = ClientConfig::new(vec![HostEndpoint::new("127.0.0.1", 11211)])
            .with_redundancy_layers(2)
            .with_reconnect_interval(Duration::from_secs(3))
            .with_operation_deadline(Duration::from_secs(30));

        assert_eq!(config.host_redundancy_layers, 2);
        assert_eq!(config.host_reconnect_interval, Duration::from_secs(3));
        assert_eq!(config.operation_deadline, Some(Duration::from_secs(30)));
    }
}
