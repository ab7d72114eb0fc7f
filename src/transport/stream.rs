//! Transports over OS byte streams: TCP sockets and character devices

use super::{TransportReader, TransportSpec, TransportWriter};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Write half over any async byte sink
pub struct StreamWriter<W> {
    inner: W,
}

impl<W> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<W> TransportWriter for StreamWriter<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner
            .write_all(bytes)
            .await
            .map_err(|e| AppError::transport_write(e.to_string()))?;
        self.inner
            .flush()
            .await
            .map_err(|e| AppError::transport_write(e.to_string()))
    }
}

/// Read half over any async byte source
pub struct StreamReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R> StreamReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_chunk_size(inner, crate::defaults::READ_CHUNK_SIZE)
    }

    pub fn with_chunk_size(inner: R, chunk_size: usize) -> Self {
        Self {
            inner,
            buf: vec![0u8; chunk_size.max(1)],
        }
    }
}

#[async_trait]
impl<R> TransportReader for StreamReader<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        match tokio::time::timeout(timeout, self.inner.read(&mut self.buf)).await {
            Err(_) => Ok(None),
            Ok(Ok(0)) => Err(AppError::transport_read("link closed by the remote end")),
            Ok(Ok(n)) => Ok(Some(self.buf[..n].to_vec())),
            Ok(Err(e)) => Err(AppError::transport_read(e.to_string())),
        }
    }
}

type Halves = (Box<dyn TransportWriter>, Box<dyn TransportReader>);

/// Open both halves of a stream transport
pub(crate) async fn open(spec: &TransportSpec) -> Result<Halves> {
    match spec {
        TransportSpec::Tcp(addr) => open_tcp(addr).await,
        TransportSpec::Device(path) => open_device(path).await,
        TransportSpec::Loopback => Err(AppError::internal("loopback is not a stream transport")),
    }
}

async fn open_tcp(addr: &str) -> Result<Halves> {
    let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
        .await
        .map_err(|_| AppError::transport(format!("Timed out connecting to {}", addr)))?
        .map_err(|e| AppError::transport(format!("Failed to connect to {}: {}", addr, e)))?;

    stream
        .set_nodelay(true)
        .map_err(|e| AppError::transport(format!("Failed to configure {}: {}", addr, e)))?;

    let (read_half, write_half) = stream.into_split();
    Ok((
        Box::new(StreamWriter::new(write_half)),
        Box::new(StreamReader::new(read_half)),
    ))
}

// Two handles, so a read blocked on an idle device never holds up writes
async fn open_device(path: &Path) -> Result<Halves> {
    let writer = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| AppError::transport(format!("Failed to open {} for writing: {}", path.display(), e)))?;
    let reader = tokio::fs::OpenOptions::new()
        .read(true)
        .open(path)
        .await
        .map_err(|e| AppError::transport(format!("Failed to open {} for reading: {}", path.display(), e)))?;

    Ok((
        Box::new(StreamWriter::new(writer)),
        Box::new(StreamReader::new(reader)),
    ))
}
