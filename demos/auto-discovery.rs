//! Example of multicast auto-discovery of cache hosts.
//!
//! The client starts with an empty fleet and grows it from `HELO`
//! beacons on the multicast group; hosts announce `BYE` when leaving.
//!
//! Run the client, then announce a host from another terminal (or let
//! real Dache hosts announce themselves):
//!
//!   RUST_LOG=info cargo run --example auto-discovery

use dache_client::discovery::{encode_beacon, Beacon};
use dache_client::{CacheClient, ClientConfig, HostEndpoint};
use std::env;
use std::time::Duration;
use tokio::net::UdpSocket;

const MULTICAST_GROUP: &str = "224.0.0.251";
const MULTICAST_PORT: u16 = 33340;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    // No static hosts: everything is learned from beacons.
    let config = ClientConfig::new(Vec::new())
        .with_redundancy_layers(1)
        .with_auto_discovery(MULTICAST_GROUP, MULTICAST_PORT);

    println!("===========================================");
    println!("  Auto-Discovery Example");
    println!("  group {MULTICAST_GROUP}:{MULTICAST_PORT}");
    println!("===========================================");

    let client = CacheClient::connect(config).await?;

    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("event: {event:?}");
        }
    });

    // Announce a (pretend) host so the example does something visible
    // even without a live fleet.
    let sender = UdpSocket::bind("0.0.0.0:0").await?;
    let beacon = Beacon::Hello(HostEndpoint::new("127.0.0.1", 33333));
    sender
        .send_to(&encode_beacon(&beacon), (MULTICAST_GROUP, MULTICAST_PORT))
        .await?;
    println!("Announced {beacon:?}");

    // Give discovery a moment, then try an operation; with no real
    // host listening the connection stays offline and the fleet is
    // reported exhausted.
    tokio::time::sleep(Duration::from_secs(1)).await;
    match client.get::<String>("user:42").await {
        Ok(value) => println!("user:42 = {value:?}"),
        Err(e) => println!("lookup failed: {e}"),
    }

    client.shutdown().await;
    Ok(())
}
