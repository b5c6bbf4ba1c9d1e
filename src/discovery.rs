//! UDP multicast auto-discovery of cache hosts.
//!
//! Hosts announce themselves with UTF-16LE beacons on a multicast
//! group: `HELO <address> <port>` on startup, `BYE <address> <port>`
//! on graceful shutdown. The listener translates them into fleet
//! membership changes.

use crate::error::{NetworkError, Result};
use crate::invalidation::{decode_utf16le, encode_utf16le};
use crate::types::HostEndpoint;
use std::net::Ipv4Addr;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A parsed discovery beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Beacon {
    /// A host announced itself.
    Hello(HostEndpoint),

    /// A host is leaving the fleet.
    Bye(HostEndpoint),
}

/// Encode a beacon for transmission, as the host side sends it.
pub fn encode_beacon(beacon: &Beacon) -> Vec<u8> {
    let text = match beacon {
        Beacon::Hello(ep) => format!("HELO {} {}", ep.address, ep.port),
        Beacon::Bye(ep) => format!("BYE {} {}", ep.address, ep.port),
    };
    encode_utf16le(&text)
}

/// Parse a received datagram. `None` for anything that is not a
/// well-formed beacon.
pub fn parse_beacon(payload: &[u8]) -> Option<Beacon> {
    let text = decode_utf16le(payload)?;
    let mut parts = text.split(' ');
    let command = parts.next()?;
    let address = parts.next()?;
    let port: u16 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || address.is_empty() {
        return None;
    }

    let endpoint = HostEndpoint::new(address, port);
    match command {
        "HELO" => Some(Beacon::Hello(endpoint)),
        "BYE" => Some(Beacon::Bye(endpoint)),
        _ => None,
    }
}

/// Multicast listener feeding beacons to the cache client.
pub struct DiscoveryListener {
    group: Ipv4Addr,
    port: u16,
    beacons: mpsc::UnboundedSender<Beacon>,
    stop: CancellationToken,
}

impl DiscoveryListener {
    /// Create a listener for the given multicast group.
    pub fn new(
        group: Ipv4Addr,
        port: u16,
        beacons: mpsc::UnboundedSender<Beacon>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            group,
            port,
            beacons,
            stop,
        }
    }

    /// Join the group and poll for beacons until stopped.
    pub async fn run(self) -> Result<()> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.port))
            .await
            .map_err(NetworkError::Io)?;
        socket
            .join_multicast_v4(self.group, Ipv4Addr::UNSPECIFIED)
            .map_err(NetworkError::Io)?;

        info!(group = %self.group, port = self.port, "discovery listener joined multicast group");

        let mut buf = vec![0u8; 2048];
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    info!("discovery listener stopped");
                    return Ok(());
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "discovery receive failed");
                            continue;
                        }
                    };
                    match parse_beacon(&buf[..len]) {
                        Some(beacon) => {
                            debug!(?beacon, %from, "beacon received");
                            if self.beacons.send(beacon).is_err() {
                                // Nobody is listening any more.
                                return Ok(());
                            }
                        }
                        None => debug!(%from, len, "ignoring malformed beacon"),
                    }
                }
            }
        }
    }
}
