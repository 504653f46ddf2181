//! The protocol client.
//!
//! [`Client`] performs the handshake, then runs four background tasks per
//! connection (heartbeat, reader, dispatcher, request reaper) until the
//! server kicks it, the transport fails, or [`Client::disconnect`] is
//! called. All asynchronous outcomes (responses, pushes, synthetic request
//! timeouts) arrive on the receiver returned by [`Client::msg_channel`].

mod loops;
mod session;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::codec::PacketCodec;
use crate::config::ClientConfig;
use crate::error::StemError;
use crate::handshake;
use crate::message::{Message, MessageCodec, MessageType};
use crate::network::{ConnectionInfo, StreamTransport, Transport};
use crate::packet::PacketType;

use self::loops::LoopSettings;
use self::session::Session;

pub type MessageReceiver = mpsc::Receiver<Message>;

/// Cheaply cloneable handle to one protocol client.
///
/// A client holds at most one live connection. After a disconnect it can
/// connect again; each connection gets a fresh ledger, route dictionary
/// and inbound queue.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    next_id: AtomicU64,
    session: Mutex<Option<Arc<Session>>>,
    messages: Mutex<Option<MessageReceiver>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                next_id: AtomicU64::new(0),
                session: Mutex::new(None),
                messages: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ── Connection management ────────────────────────────────────

    /// Connect over plain TCP to `config.addr` and run the handshake.
    pub async fn connect(&self) -> Result<(), StemError> {
        self.ensure_disconnected()?;
        let info = ConnectionInfo::parse(&self.inner.config.addr)?;
        let transport =
            StreamTransport::connect(&info, self.inner.config.read_buffer_size()).await?;
        self.connect_with(Arc::new(transport)).await
    }

    /// Connect over TLS to `config.addr` and run the handshake.
    pub async fn connect_tls(&self, skip_verify: bool) -> Result<(), StemError> {
        self.ensure_disconnected()?;
        let info = ConnectionInfo::parse(&self.inner.config.addr)?;
        let transport =
            StreamTransport::connect_tls(&info, skip_verify, self.inner.config.read_buffer_size())
                .await?;
        self.connect_with(Arc::new(transport)).await
    }

    /// Run the handshake over an already established transport.
    ///
    /// Returns once the handshake has failed (the transport is closed and
    /// nothing keeps running) or the background tasks have started.
    pub async fn connect_with(&self, transport: Arc<dyn Transport>) -> Result<(), StemError> {
        if let Err(e) = self.ensure_disconnected() {
            let _ = transport.close().await;
            return Err(e);
        }

        let config = &self.inner.config;
        let deadline = config.handshake_timeout();
        let negotiated = match tokio::time::timeout(
            deadline,
            handshake::negotiate(transport.as_ref(), &config.handshake),
        )
        .await
        {
            Ok(Ok(negotiated)) => negotiated,
            Ok(Err(e)) => {
                error!(error = %e, "handshake failed");
                let _ = transport.close().await;
                self.discard_stale_receiver();
                return Err(e);
            }
            Err(_) => {
                error!(?deadline, "handshake timed out");
                let _ = transport.close().await;
                self.discard_stale_receiver();
                return Err(StemError::Timeout(deadline));
            }
        };

        let codec = MessageCodec::new(negotiated.dictionary)
            .with_body_compression(config.compress_bodies);
        let session = Arc::new(Session::new(
            transport,
            codec,
            config.max_inflight(),
            negotiated.heartbeat,
            negotiated.serializer,
        ));
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity());

        let installed = {
            let mut slot = lock(&self.inner.session);
            if slot.as_ref().is_some_and(|s| s.is_connected()) {
                false
            } else {
                *slot = Some(session.clone());
                *lock(&self.inner.messages) = Some(inbound_rx);
                true
            }
        };
        if !installed {
            // Lost a race with a concurrent connect.
            session.teardown().await;
            return Err(StemError::AlreadyConnected);
        }

        loops::spawn_all(
            &session,
            inbound_tx,
            negotiated.buffer,
            negotiated.backlog,
            LoopSettings {
                packet_queue_capacity: config.packet_queue_capacity(),
                request_timeout: config.request_timeout(),
                reaper_interval: config.reaper_interval(),
            },
        );

        info!(
            heartbeat = ?session.heartbeat,
            routes = session.codec.dictionary().len(),
            serializer = %session.serializer,
            "connected",
        );
        Ok(())
    }

    /// Tear down the current connection. Safe to call repeatedly and from
    /// any task; returns without waiting for background tasks to exit.
    pub async fn disconnect(&self) {
        if let Some(session) = self.session() {
            session.teardown().await;
        }
    }

    /// Wait until every background task of the current connection has
    /// exited. Returns immediately if there never was a connection.
    pub async fn wait_stopped(&self) {
        if let Some(session) = self.session() {
            session.tasks.wait().await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session().is_some_and(|s| s.is_connected())
    }

    /// Take the inbound message receiver of the current connection.
    ///
    /// Each connection has exactly one receiver; later calls return `None`
    /// until the next successful connect.
    pub fn msg_channel(&self) -> Option<MessageReceiver> {
        lock(&self.inner.messages).take()
    }

    /// Requests currently awaiting a response or a timeout.
    pub fn pending_requests(&self) -> usize {
        self.session().map_or(0, |s| s.ledger.len())
    }

    /// Serializer announced by the server during the handshake.
    pub fn serializer(&self) -> Option<String> {
        self.session().map(|s| s.serializer.clone())
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.session().map(|s| s.heartbeat)
    }

    // ── Sending ──────────────────────────────────────────────────

    /// Send a fire-and-forget message. Never occupies a request slot.
    pub async fn send_notify(
        &self,
        route: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Result<(), StemError> {
        let session = self.connected_session()?;
        let message = Message::new(MessageType::Notify, self.next_id(), route, data);
        let frame = PacketCodec::encode_packet(PacketType::Data, session.codec.encode(&message)?)?;
        self.write_frame(&session, &frame).await
    }

    /// Send a request and return its id.
    ///
    /// Waits for a free slot when `max_inflight` requests are already
    /// outstanding. The outcome, either the server's response or a
    /// synthetic timeout response, arrives on the inbound queue with the
    /// same id.
    ///
    /// # Errors
    ///
    /// An encoding failure is returned before the request takes a slot.
    /// A write failure tears the connection down; the request stays
    /// registered until the session ends.
    pub async fn send_request(
        &self,
        route: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Result<u64, StemError> {
        let session = self.connected_session()?;
        let id = self.next_id();
        let message = Message::new(MessageType::Request, id, route, data);
        let frame = PacketCodec::encode_packet(PacketType::Data, session.codec.encode(&message)?)?;

        session.ledger.register(message).await?;
        self.write_frame(&session, &frame).await?;
        Ok(id)
    }

    // ── Internals ────────────────────────────────────────────────

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn session(&self) -> Option<Arc<Session>> {
        lock(&self.inner.session).clone()
    }

    fn connected_session(&self) -> Result<Arc<Session>, StemError> {
        self.session()
            .filter(|s| s.is_connected())
            .ok_or(StemError::NotConnected)
    }

    fn ensure_disconnected(&self) -> Result<(), StemError> {
        if self.is_connected() {
            return Err(StemError::AlreadyConnected);
        }
        Ok(())
    }

    /// Drop an untaken receiver left over from an ended session.
    fn discard_stale_receiver(&self) {
        let session = lock(&self.inner.session);
        if !session.as_ref().is_some_and(|s| s.is_connected()) {
            lock(&self.inner.messages).take();
        }
    }

    async fn write_frame(&self, session: &Session, frame: &[u8]) -> Result<(), StemError> {
        if let Err(e) = session.transport.write(frame).await {
            if session.is_connected() {
                error!(error = %e, "writing to server");
            }
            session.teardown().await;
            return Err(e);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.inner.config.addr)
            .field("connected", &self.is_connected())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}
