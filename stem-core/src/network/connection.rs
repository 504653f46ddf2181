use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::StemError;
use crate::network::{Transport, tls};

const DEFAULT_READ_BUFFER: usize = 4096;

/// Upper bound on the write-side shutdown performed by `close`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Anything a [`StreamTransport`] can run over: TCP, TLS, in-memory pipes.
pub trait IoStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> IoStream for T {}

type BoxedStream = Box<dyn IoStream>;

/// [`Transport`] over any [`IoStream`].
///
/// The stream is split so a blocked read never holds up writers.
pub struct StreamTransport {
    reader: Mutex<ReadHalf<BoxedStream>>,
    writer: Mutex<WriteHalf<BoxedStream>>,
    closed: CancellationToken,
    read_buffer_size: usize,
}

impl StreamTransport {
    pub fn new<S: IoStream>(stream: S) -> Self {
        Self::with_buffer_size(stream, DEFAULT_READ_BUFFER)
    }

    pub fn with_buffer_size<S: IoStream>(stream: S, read_buffer_size: usize) -> Self {
        let boxed: BoxedStream = Box::new(stream);
        let (reader, writer) = tokio::io::split(boxed);
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed: CancellationToken::new(),
            read_buffer_size,
        }
    }

    /// Plain TCP.
    pub async fn connect(info: &ConnectionInfo, read_buffer_size: usize) -> Result<Self, StemError> {
        let stream = TcpStream::connect(info.to_string()).await?;
        stream.set_nodelay(true)?;
        debug!(addr = %info, "tcp connected");
        Ok(Self::with_buffer_size(stream, read_buffer_size))
    }

    /// TLS over TCP. `skip_verify` accepts any server certificate.
    pub async fn connect_tls(
        info: &ConnectionInfo,
        skip_verify: bool,
        read_buffer_size: usize,
    ) -> Result<Self, StemError> {
        let stream = TcpStream::connect(info.to_string()).await?;
        stream.set_nodelay(true)?;
        let stream = tls::wrap(stream, info.host(), skip_verify).await?;
        debug!(addr = %info, skip_verify, "tls connected");
        Ok(Self::with_buffer_size(stream, read_buffer_size))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

#[async_trait]
impl Transport for StreamTransport {
    async fn read(&self) -> Result<Bytes, StemError> {
        if self.closed.is_cancelled() {
            return Err(StemError::ConnectionClosed);
        }
        let mut reader = self.reader.lock().await;
        let mut buf = BytesMut::with_capacity(self.read_buffer_size);
        let n = tokio::select! {
            _ = self.closed.cancelled() => return Err(StemError::ConnectionClosed),
            result = reader.read_buf(&mut buf) => result?,
        };
        if n == 0 {
            return Err(StemError::ConnectionClosed);
        }
        Ok(buf.freeze())
    }

    async fn write(&self, data: &[u8]) -> Result<(), StemError> {
        if self.closed.is_cancelled() {
            return Err(StemError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => Err(StemError::ConnectionClosed),
            result = async {
                writer.write_all(data).await?;
                writer.flush().await
            } => result.map_err(StemError::from),
        }
    }

    async fn close(&self) -> Result<(), StemError> {
        // Cancel first so in-flight reads and writes release their locks.
        self.closed.cancel();
        // A peer that stopped reading must not stall teardown (TLS
        // close_notify is a write).
        let shutdown = async {
            let mut writer = self.writer.lock().await;
            writer.shutdown().await
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, shutdown).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StemError::Timeout(CLOSE_TIMEOUT)),
        }
    }
}

// ── ConnectionInfo ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host:port`; IPv6 hosts may be bracketed (`[::1]:3250`).
    pub fn parse(addr: &str) -> Result<Self, StemError> {
        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| StemError::Other(format!("address {addr:?} has no port")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| StemError::Other(format!("invalid port in {addr:?}: {e}")))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(StemError::Other(format!("address {addr:?} has no host")));
        }
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
