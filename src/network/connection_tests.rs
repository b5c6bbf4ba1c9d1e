//! Integration tests for TcpCacheHost against a scripted host.

#![cfg(test)]

use crate::error::{Error, NetworkError};
use crate::network::wire::{self, HostFrame, Request, RequestFrame, Response};
use crate::network::{CacheHost, ConnectionOptions, HostEvent, HostEventKind, TcpCacheHost};
use crate::types::{HostEndpoint, WriteOptions};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// In-memory cache host speaking the client wire protocol.
struct MockHostServer {
    port: u16,
    store: Arc<TokioMutex<HashMap<String, Vec<u8>>>>,
    accept_task: JoinHandle<()>,
    conn_tasks: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl MockHostServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self::run(listener).await
    }

    async fn start_on(port: u16) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        Self::run(listener).await
    }

    async fn run(listener: TcpListener) -> Self {
        let port = listener.local_addr().unwrap().port();
        let store: Arc<TokioMutex<HashMap<String, Vec<u8>>>> = Arc::default();
        let conn_tasks: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>> = Arc::default();

        let store_clone = store.clone();
        let conn_tasks_clone = conn_tasks.clone();
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let store = store_clone.clone();
                let handle = tokio::spawn(serve_connection(stream, store));
                conn_tasks_clone.lock().unwrap().push(handle);
            }
        });

        Self {
            port,
            store,
            accept_task,
            conn_tasks,
        }
    }

    fn endpoint(&self) -> HostEndpoint {
        HostEndpoint::new("127.0.0.1", self.port)
    }

    /// Drop the listener and every open connection.
    fn kill(&self) {
        self.accept_task.abort();
        for task in self.conn_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

impl Drop for MockHostServer {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn serve_connection(mut stream: TcpStream, store: Arc<TokioMutex<HashMap<String, Vec<u8>>>>) {
    loop {
        let mut len_buf = [0u8; wire::LENGTH_PREFIX_BYTES];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return;
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; len];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }

        let frame: RequestFrame = wire::decode_body(&body).unwrap();
        let response = apply(&mut *store.lock().await, frame.request);
        let reply = wire::encode_framed(&HostFrame::Reply {
            id: frame.id,
            result: Ok(response),
        })
        .unwrap();
        if stream.write_all(&reply).await.is_err() {
            return;
        }
    }
}

fn apply(store: &mut HashMap<String, Vec<u8>>, request: Request) -> Response {
    match request {
        Request::Get { keys } => {
            Response::Values(keys.iter().map(|k| store.get(k).cloned()).collect())
        }
        Request::AddOrUpdate { entries, .. } => {
            for (key, value) in entries {
                store.insert(key, value);
            }
            Response::Ack
        }
        Request::Remove { keys } => {
            for key in &keys {
                store.remove(key);
            }
            Response::Ack
        }
        Request::GetCacheKeys { .. } => {
            let mut keys: Vec<String> = store.keys().cloned().collect();
            keys.sort();
            Response::Keys(keys)
        }
        Request::Clear => {
            store.clear();
            Response::Ack
        }
        Request::GetTagged { .. } => Response::Items(Vec::new()),
        Request::GetCacheKeysTagged { .. } => Response::Keys(Vec::new()),
        Request::RemoveTagged { .. } => Response::Ack,
    }
}

fn test_options() -> ConnectionOptions {
    ConnectionOptions {
        connect_timeout: Duration::from_secs(1),
        request_timeout: Duration::from_millis(500),
        reconnect_interval: Duration::from_millis(50),
        write_buffer_size: 4096,
        max_frame_bytes: 1024 * 1024,
    }
}

fn new_host(
    endpoint: HostEndpoint,
) -> (TcpCacheHost, mpsc::UnboundedReceiver<HostEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (TcpCacheHost::new(endpoint, test_options(), tx), rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<HostEvent>) -> HostEvent {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for host event")
        .expect("event channel closed")
}

#[tokio::test]
async fn test_rpc_round_trip() {
    let server = MockHostServer::start().await;
    let (host, _rx) = new_host(server.endpoint());
    host.connect().await.unwrap();
    assert!(host.is_connected());

    let write = WriteOptions::default().resolve();
    let entries = vec![("k1".to_string(), Bytes::from_static(b"v1"))];
    host.add_or_update(&entries, None, &write).await.unwrap();

    let values = host.get(&["k1".to_string(), "missing".to_string()]).await.unwrap();
    assert_eq!(values[0], Some(Bytes::from_static(b"v1")));
    assert_eq!(values[1], None);

    let keys = host.get_cache_keys("*").await.unwrap();
    assert_eq!(keys, vec!["k1".to_string()]);

    host.remove(&["k1".to_string()]).await.unwrap();
    let values = host.get(&["k1".to_string()]).await.unwrap();
    assert_eq!(values[0], None);

    host.disconnect().await;
}

#[tokio::test]
async fn test_not_connected() {
    let (host, _rx) = new_host(HostEndpoint::new("127.0.0.1", 1));
    let result = host.get(&["k".to_string()]).await;
    assert!(matches!(
        result,
        Err(Error::Network(NetworkError::NotConnected))
    ));
}

#[tokio::test]
async fn test_request_timeout() {
    // Accepts connections but never replies.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let silent = tokio::spawn(async move {
        let mut conns = Vec::new();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            conns.push(stream);
        }
    });

    let (host, _rx) = new_host(HostEndpoint::new("127.0.0.1", port));
    host.connect().await.unwrap();

    let result = host.get(&["k".to_string()]).await;
    assert!(matches!(
        result,
        Err(Error::Network(NetworkError::RequestTimeout))
    ));

    silent.abort();
    host.disconnect().await;
}

#[tokio::test]
async fn test_disconnect_event_then_reconnect() {
    let server = MockHostServer::start().await;
    let endpoint = server.endpoint();
    let port = server.port;

    let (host, mut rx) = new_host(endpoint.clone());
    host.connect().await.unwrap();

    server.kill();
    drop(server);

    let event = next_event(&mut rx).await;
    assert!(matches!(event.kind, HostEventKind::Disconnected));
    assert_eq!(event.endpoint, endpoint);
    assert!(!host.is_connected());

    // Bring the host back on the same port; the connection's own
    // retry loop should find it.
    let revived = MockHostServer::start_on(port).await;

    let event = next_event(&mut rx).await;
    assert!(matches!(event.kind, HostEventKind::Reconnected));
    assert!(host.is_connected());

    let write = WriteOptions::default().resolve();
    let entries = vec![("k".to_string(), Bytes::from_static(b"v"))];
    host.add_or_update(&entries, None, &write).await.unwrap();
    assert_eq!(revived.store.lock().await.len(), 1);

    host.disconnect().await;
}

#[tokio::test]
async fn test_push_frame_delivery() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let pusher = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let frame = wire::encode_framed(&HostFrame::Push {
            payload: vec![9, 9, 9],
        })
        .unwrap();
        stream.write_all(&frame).await.unwrap();
        // Keep the connection open until the test is done reading.
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let (host, mut rx) = new_host(HostEndpoint::new("127.0.0.1", port));
    host.connect().await.unwrap();

    let event = next_event(&mut rx).await;
    match event.kind {
        HostEventKind::MessageReceived(payload) => {
            assert_eq!(payload, Bytes::from_static(&[9, 9, 9]));
        }
        other => panic!("wrong event: {other:?}"),
    }

    pusher.abort();
    host.disconnect().await;
}

#[tokio::test]
async fn test_connect_after_disconnect_is_rejected() {
    let server = MockHostServer::start().await;
    let (host, _rx) = new_host(server.endpoint());
    host.connect().await.unwrap();
    host.disconnect().await;

    assert!(matches!(host.connect().await, Err(Error::Shutdown)));
}
