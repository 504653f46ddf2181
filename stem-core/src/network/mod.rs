//! Byte-stream transports the client runs over.

mod connection;
pub mod tls;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StemError;

pub use connection::{ConnectionInfo, IoStream, StreamTransport};

/// A duplex byte stream.
///
/// `read` is only ever called from one task at a time; `write` may be
/// called concurrently (heartbeats and application sends) and must not
/// interleave frames. `close` must unblock a pending `read`.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Wait for the next chunk of bytes. An orderly EOF is
    /// [`StemError::ConnectionClosed`].
    async fn read(&self) -> Result<Bytes, StemError>;

    /// Write the whole buffer.
    async fn write(&self, data: &[u8]) -> Result<(), StemError>;

    async fn close(&self) -> Result<(), StemError>;
}
