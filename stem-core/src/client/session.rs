//! State owned by one connection, from handshake to teardown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::error::StemError;
use crate::ledger::PendingLedger;
use crate::message::MessageCodec;
use crate::network::Transport;
use crate::packet::Packet;

pub(crate) struct Session {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) codec: MessageCodec,
    pub(crate) ledger: PendingLedger,
    pub(crate) shutdown: CancellationToken,
    pub(crate) tasks: TaskTracker,
    pub(crate) heartbeat: Duration,
    pub(crate) serializer: String,
    connected: AtomicBool,
}

impl Session {
    /// A session is only built after a successful handshake, so it starts
    /// out connected.
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        codec: MessageCodec,
        max_inflight: usize,
        heartbeat: Duration,
        serializer: String,
    ) -> Self {
        Self {
            transport,
            codec,
            ledger: PendingLedger::new(max_inflight),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
            heartbeat,
            serializer,
            connected: AtomicBool::new(true),
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) async fn write_packet(&self, packet: &Packet) -> Result<(), StemError> {
        let bytes = packet.to_bytes()?;
        self.transport.write(&bytes).await
    }

    /// Tear the connection down. Only the first call does anything;
    /// returns whether this call was it.
    ///
    /// Does not wait for the background tasks; closing the transport is
    /// enough to unblock the reader.
    pub(crate) async fn teardown(&self) -> bool {
        if self
            .connected
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        info!(pending = self.ledger.len(), "disconnecting");
        self.shutdown.cancel();
        self.ledger.close();
        self.tasks.close();
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "closing transport");
        }
        true
    }
}
