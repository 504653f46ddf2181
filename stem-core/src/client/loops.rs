//! Background tasks of a connected session.
//!
//! ```text
//! transport ─► reader ─► packet queue ─► dispatcher ─┐
//!                                                    ├─► inbound queue
//!                              ledger ─► reaper ─────┘
//! heartbeat ─► transport
//! ```
//!
//! All four exit once the session's shutdown token fires. The reader and
//! the heartbeat tear the session down when they stop for any other reason.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

use crate::client::session::Session;
use crate::codec::PacketCodec;
use crate::message::Message;
use crate::packet::{Packet, PacketType};

/// Bytes of an undecodable payload included in the log line.
const PREVIEW_BYTES: usize = 32;

pub(crate) struct LoopSettings {
    pub packet_queue_capacity: usize,
    pub request_timeout: Duration,
    pub reaper_interval: Duration,
}

pub(crate) fn spawn_all(
    session: &Arc<Session>,
    inbound: mpsc::Sender<Message>,
    buffer: BytesMut,
    backlog: Vec<Packet>,
    settings: LoopSettings,
) {
    let (packet_tx, packet_rx) = mpsc::channel(settings.packet_queue_capacity);

    session.tasks.spawn(heartbeat(session.clone()));
    session
        .tasks
        .spawn(read_packets(session.clone(), buffer, backlog, packet_tx));
    session
        .tasks
        .spawn(dispatch_packets(session.clone(), packet_rx, inbound.clone()));
    session.tasks.spawn(reap_pending(
        session.clone(),
        inbound,
        settings.request_timeout,
        settings.reaper_interval,
    ));
}

// ── Heartbeat ────────────────────────────────────────────────────

async fn heartbeat(session: Arc<Session>) {
    let period = session.heartbeat;
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let packet = Packet::heartbeat();

    loop {
        tokio::select! {
            _ = session.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = session.write_packet(&packet).await {
            if session.is_connected() {
                error!(error = %e, "sending heartbeat to server");
            }
            break;
        }
        trace!("heartbeat sent");
    }

    session.teardown().await;
}

// ── Reader stage ─────────────────────────────────────────────────

async fn read_packets(
    session: Arc<Session>,
    mut buffer: BytesMut,
    backlog: Vec<Packet>,
    packets: mpsc::Sender<Packet>,
) {
    let mut codec = PacketCodec::new();

    'read: {
        for packet in backlog {
            if !forward(&session, &packets, packet).await {
                break 'read;
            }
        }

        while session.is_connected() {
            let chunk = tokio::select! {
                _ = session.shutdown.cancelled() => break,
                chunk = session.transport.read() => chunk,
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    if session.is_connected() {
                        error!(error = %e, "reading from server");
                    }
                    break;
                }
            };

            buffer.extend_from_slice(&chunk);
            let (decoded, err) = codec.decode_all(&mut buffer);
            if let Some(e) = err {
                error!(error = %e, chunk_len = chunk.len(), "decoding packets from server");
            }
            for packet in decoded {
                if !forward(&session, &packets, packet).await {
                    break 'read;
                }
            }
        }
    }

    session.teardown().await;
}

async fn forward(session: &Session, packets: &mpsc::Sender<Packet>, packet: Packet) -> bool {
    tokio::select! {
        _ = session.shutdown.cancelled() => false,
        sent = packets.send(packet) => sent.is_ok(),
    }
}

// ── Consumer stage ───────────────────────────────────────────────

async fn dispatch_packets(
    session: Arc<Session>,
    mut packets: mpsc::Receiver<Packet>,
    inbound: mpsc::Sender<Message>,
) {
    loop {
        let packet = tokio::select! {
            _ = session.shutdown.cancelled() => break,
            packet = packets.recv() => match packet {
                Some(packet) => packet,
                None => break,
            },
        };

        match packet.kind() {
            PacketType::Data => {
                let mut message = match session.codec.decode(packet.payload()) {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(
                            error = %e,
                            len = packet.payload_length(),
                            preview = %hex_preview(packet.payload()),
                            "dropping undecodable message",
                        );
                        continue;
                    }
                };

                if message.is_response() {
                    match session.ledger.resolve(message.id) {
                        Some(pending) => {
                            if message.route.is_empty() {
                                message.route = pending.message.route.clone();
                            }
                        }
                        None => {
                            debug!(id = message.id, "dropping response for unknown or reaped request");
                            continue;
                        }
                    }
                }

                if !deliver(&session, &inbound, message).await {
                    break;
                }
            }
            PacketType::Kick => {
                warn!(
                    reason = %String::from_utf8_lossy(packet.payload()),
                    "kicked by server, disconnecting",
                );
                session.teardown().await;
                break;
            }
            PacketType::Heartbeat => trace!("heartbeat from server"),
            other => debug!(kind = %other, "ignoring packet after handshake"),
        }
    }
}

// ── Reaper ───────────────────────────────────────────────────────

async fn reap_pending(
    session: Arc<Session>,
    inbound: mpsc::Sender<Message>,
    timeout: Duration,
    interval: Duration,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = session.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // The ledger lock is released before anything is delivered.
        let expired = session.ledger.reap_expired(Instant::now(), timeout);
        for pending in expired {
            let message = Message::timeout_response(&pending.message);
            drop(pending);
            debug!(id = message.id, route = %message.route, "request timed out");
            if !deliver(&session, &inbound, message).await {
                return;
            }
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Push onto the inbound queue. Returns `false` only on shutdown; a
/// dropped receiver just discards the message.
async fn deliver(session: &Session, inbound: &mpsc::Sender<Message>, message: Message) -> bool {
    tokio::select! {
        _ = session.shutdown.cancelled() => false,
        sent = inbound.send(message) => {
            if let Err(mpsc::error::SendError(message)) = sent {
                trace!(id = message.id, "inbound receiver dropped, discarding message");
            }
            true
        }
    }
}

fn hex_preview(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(PREVIEW_BYTES * 2 + 3);
    for byte in bytes.iter().take(PREVIEW_BYTES) {
        let _ = write!(out, "{byte:02x}");
    }
    if bytes.len() > PREVIEW_BYTES {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_preview_is_bounded() {
        assert_eq!(hex_preview(&[0x00, 0xAB, 0x10]), "00ab10");
        let long = vec![0xFFu8; 100];
        let preview = hex_preview(&long);
        assert_eq!(preview.len(), PREVIEW_BYTES * 2 + 3);
        assert!(preview.ends_with("..."));
    }
}
