//! Basic example of using the cache client.

use dache_client::{CacheClient, ClientConfig, HostEndpoint, WriteOptions};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("dache_client=debug,info")
        .init();

    // Two hosts, one redundancy layer: a single bucket of two replicas.
    let config = ClientConfig::new(vec![
        HostEndpoint::new("127.0.0.1", 33333),
        HostEndpoint::new("127.0.0.1", 33334),
    ])
    .with_redundancy_layers(1)
    .with_communication_timeout(Duration::from_secs(5));

    println!("Connecting to the cache fleet...");
    let client = CacheClient::connect(config).await?;

    // Writes fan out to every replica of the owning bucket.
    client
        .add_or_update("user:42", "Alice", &WriteOptions::default())
        .await?;
    client
        .add_or_update(
            "session:42",
            "token-abc",
            &WriteOptions::default().with_sliding_expiration(Duration::from_secs(600)),
        )
        .await?;

    // Reads round-robin over the replicas.
    if let Some(name) = client.get::<String>("user:42").await? {
        println!("Got user:42 = {name}");
    }

    // Tagged items co-reside in one bucket, so tag scans hit one host.
    let tagged = WriteOptions::default().with_tag("hot");
    client.add_or_update("item:1", "first", &tagged).await?;
    client.add_or_update("item:2", "second", &tagged).await?;
    let hot: Vec<String> = client.get_tagged("hot").await?;
    println!("Tagged 'hot': {hot:?}");

    // Watch for host transitions and expirations.
    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            println!("event: {event:?}");
        }
    });

    // Show counters
    let metrics = client.metrics();
    println!("Operations: {}", metrics.operations);
    println!("Retries: {}", metrics.retries);

    client.shutdown().await;
    Ok(())
}
