//! Framed TCP connection to one cache host.
//!
//! Each connection owns a reader task and a writer task. Requests are
//! correlated to replies by id; unsolicited push frames are forwarded
//! to the owner's event channel. After a drop, the connection retries
//! on the configured interval until [`CacheHost::disconnect`] is
//! called, emitting `Disconnected`/`Reconnected` events as it goes.

use crate::error::{Error, NetworkError, Result};
use crate::network::wire::{self, HostFrame, Request, RequestFrame, Response};
use crate::network::{CacheHost, ConnectionOptions, HostEvent};
use crate::types::{HostEndpoint, ResolvedWrite};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// TCP-backed [`CacheHost`] implementation.
pub struct TcpCacheHost {
    shared: Arc<Shared>,
}

struct Shared {
    endpoint: HostEndpoint,
    options: ConnectionOptions,
    events: mpsc::UnboundedSender<HostEvent>,
    pending: DashMap<u64, oneshot::Sender<std::result::Result<Response, String>>>,
    next_id: AtomicU64,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    closed: CancellationToken,
    writer: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
}

impl TcpCacheHost {
    /// Create a connection for the given endpoint. No I/O happens
    /// until [`CacheHost::connect`] is called.
    pub fn new(
        endpoint: HostEndpoint,
        options: ConnectionOptions,
        events: mpsc::UnboundedSender<HostEvent>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                endpoint,
                options,
                events,
                pending: DashMap::new(),
                next_id: AtomicU64::new(1),
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                closed: CancellationToken::new(),
                writer: Mutex::new(None),
            }),
        }
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let shared = &self.shared;
        let writer = shared.writer.lock().clone();
        let Some(writer) = writer else {
            return Err(NetworkError::NotConnected.into());
        };

        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        shared.pending.insert(id, tx);

        let frame = match wire::encode_framed(&RequestFrame { id, request }) {
            Ok(frame) => frame,
            Err(e) => {
                shared.pending.remove(&id);
                return Err(NetworkError::SendFailed(e.to_string()).into());
            }
        };

        if writer.send(frame).is_err() {
            shared.pending.remove(&id);
            return Err(NetworkError::NotConnected.into());
        }

        match timeout(shared.options.request_timeout, rx).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(remote))) => Err(NetworkError::Remote(remote).into()),
            Ok(Err(_)) => Err(NetworkError::ConnectionClosed.into()),
            Err(_) => {
                shared.pending.remove(&id);
                Err(NetworkError::RequestTimeout.into())
            }
        }
    }
}

impl Shared {
    async fn establish(shared: &Arc<Shared>) -> Result<()> {
        let addr = shared.endpoint.to_string();

        let stream = timeout(shared.options.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| NetworkError::ConnectionFailed {
                addr: addr.clone(),
                reason: "connect timed out".to_string(),
            })?
            .map_err(|e| NetworkError::ConnectionFailed {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        *shared.writer.lock() = Some(writer_tx);
        shared.connected.store(true, Ordering::SeqCst);

        tokio::spawn(Self::write_loop(shared.clone(), write_half, writer_rx));
        tokio::spawn(Self::read_loop(shared.clone(), read_half));

        Ok(())
    }

    async fn write_loop(
        shared: Arc<Shared>,
        mut write: OwnedWriteHalf,
        mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    ) {
        let mut buf = BytesMut::with_capacity(shared.options.write_buffer_size);
        while let Some(frame) = rx.recv().await {
            buf.extend_from_slice(&frame);
            // Coalesce whatever queued behind it into one syscall.
            while let Ok(frame) = rx.try_recv() {
                buf.extend_from_slice(&frame);
            }
            if write.write_all(&buf).await.is_err() {
                break;
            }
            buf.clear();
        }
    }

    async fn read_loop(shared: Arc<Shared>, mut read: OwnedReadHalf) {
        loop {
            let frame = tokio::select! {
                _ = shared.closed.cancelled() => break,
                frame = Self::read_frame(&mut read, shared.options.max_frame_bytes) => {
                    match frame {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!(endpoint = %shared.endpoint, error = %e, "read failed");
                            break;
                        }
                    }
                }
            };

            match frame {
                HostFrame::Reply { id, result } => {
                    if let Some((_, tx)) = shared.pending.remove(&id) {
                        let _ = tx.send(result);
                    }
                }
                HostFrame::Push { payload } => {
                    let _ = shared
                        .events
                        .send(HostEvent::message(shared.endpoint.clone(), Bytes::from(payload)));
                }
            }
        }

        shared.drop_link();

        if !shared.closed.is_cancelled() {
            warn!(endpoint = %shared.endpoint, "host connection lost");
            let _ = shared
                .events
                .send(HostEvent::disconnected(shared.endpoint.clone()));
            Self::spawn_reconnect(shared.clone());
        }
    }

    async fn read_frame(read: &mut OwnedReadHalf, max_bytes: usize) -> io::Result<HostFrame> {
        let mut len_buf = [0u8; wire::LENGTH_PREFIX_BYTES];
        read.read_exact(&mut len_buf).await?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > max_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds the {max_bytes} byte limit"),
            ));
        }

        let mut body = vec![0u8; len];
        read.read_exact(&mut body).await?;
        wire::decode_body(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Forget the live link and fail all in-flight requests.
    fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.writer.lock() = None;
        // Dropping the senders wakes every waiter with a recv error.
        self.pending.clear();
    }

    fn spawn_reconnect(shared: Arc<Shared>) {
        if shared.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shared.closed.cancelled() => break,
                    _ = sleep(shared.options.reconnect_interval) => {}
                }

                match Self::establish(&shared).await {
                    Ok(()) => {
                        info!(endpoint = %shared.endpoint, "host connection restored");
                        let _ = shared
                            .events
                            .send(HostEvent::reconnected(shared.endpoint.clone()));
                        break;
                    }
                    Err(e) => {
                        debug!(endpoint = %shared.endpoint, error = %e, "reconnect attempt failed");
                    }
                }
            }
            shared.reconnecting.store(false, Ordering::SeqCst);
        });
    }
}

fn unexpected(response: Response) -> Error {
    NetworkError::ReceiveFailed(format!("unexpected response: {response:?}")).into()
}

#[async_trait]
impl CacheHost for TcpCacheHost {
    fn endpoint(&self) -> &HostEndpoint {
        &self.shared.endpoint
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn connect(&self) -> Result<()> {
        if self.shared.closed.is_cancelled() {
            return Err(Error::Shutdown);
        }
        if self.is_connected() {
            return Ok(());
        }

        match Shared::establish(&self.shared).await {
            Ok(()) => {
                info!(endpoint = %self.shared.endpoint, "connected to cache host");
                Ok(())
            }
            Err(e) => {
                // Keep trying in the background; the routing table will
                // hear a Reconnected event once the host comes up.
                Shared::spawn_reconnect(self.shared.clone());
                Err(e)
            }
        }
    }

    async fn disconnect(&self) {
        self.shared.closed.cancel();
        self.shared.drop_link();
        debug!(endpoint = %self.shared.endpoint, "host connection closed");
    }

    async fn get(&self, keys: &[String]) -> Result<Vec<Option<Bytes>>> {
        match self.call(Request::Get { keys: keys.to_vec() }).await? {
            Response::Values(values) => Ok(values.into_iter().map(|v| v.map(Bytes::from)).collect()),
            other => Err(unexpected(other)),
        }
    }

    async fn add_or_update(
        &self,
        entries: &[(String, Bytes)],
        tag: Option<&str>,
        write: &ResolvedWrite,
    ) -> Result<()> {
        let entries = entries
            .iter()
            .map(|(key, value)| (key.clone(), value.to_vec()))
            .collect();
        let request = Request::AddOrUpdate {
            entries,
            tag: tag.map(str::to_string),
            write: *write,
        };
        match self.call(request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        match self.call(Request::Remove { keys: keys.to_vec() }).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn get_tagged(&self, tags: &[String], pattern: &str) -> Result<Vec<Bytes>> {
        let request = Request::GetTagged {
            tags: tags.to_vec(),
            pattern: pattern.to_string(),
        };
        match self.call(request).await? {
            Response::Items(items) => Ok(items.into_iter().map(Bytes::from).collect()),
            other => Err(unexpected(other)),
        }
    }

    async fn remove_tagged(&self, tags: &[String], pattern: &str) -> Result<()> {
        let request = Request::RemoveTagged {
            tags: tags.to_vec(),
            pattern: pattern.to_string(),
        };
        match self.call(request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn get_cache_keys(&self, pattern: &str) -> Result<Vec<String>> {
        let request = Request::GetCacheKeys {
            pattern: pattern.to_string(),
        };
        match self.call(request).await? {
            Response::Keys(keys) => Ok(keys),
            other => Err(unexpected(other)),
        }
    }

    async fn get_cache_keys_tagged(&self, tags: &[String], pattern: &str) -> Result<Vec<String>> {
        let request = Request::GetCacheKeysTagged {
            tags: tags.to_vec(),
            pattern: pattern.to_string(),
        };
        match self.call(request).await? {
            Response::Keys(keys) => Ok(keys),
            other => Err(unexpected(other)),
        }
    }

    async fn clear(&self) -> Result<()> {
        match self.call(Request::Clear).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}
