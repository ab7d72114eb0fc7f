//! Duplex byte transports the engine runs over
//!
//! The engine only needs two things from a link: write a whole frame, and
//! read whatever bytes are available within a timeout. Each direction is a
//! trait object so the sender and receiver can hold their half independently.

pub mod loopback;
pub mod stream;

pub use loopback::{ImpairmentConfig, LoopbackReader, LoopbackWriter};
pub use stream::{StreamReader, StreamWriter};

use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Write side of a link
#[async_trait]
pub trait TransportWriter: Send {
    /// Write every byte or fail with a transport write error
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Read side of a link
#[async_trait]
pub trait TransportReader: Send {
    /// Bytes available within `timeout`, or `None` when the timeout expired first
    async fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Discard everything already pending on the input; returns the byte count
    async fn drain_input(&mut self) -> Result<usize> {
        let mut drained = 0;
        while let Some(chunk) = self.read_chunk(Duration::ZERO).await? {
            drained += chunk.len();
        }
        Ok(drained)
    }
}

/// Where a link is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSpec {
    /// In-process simulated link
    Loopback,
    /// `host:port` of a TCP byte stream
    Tcp(String),
    /// Character device or other file opened read/write
    Device(PathBuf),
}

impl TransportSpec {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(AppError::config("Transport cannot be empty"));
        }

        if input.eq_ignore_ascii_case("loopback") || input.eq_ignore_ascii_case("loop") {
            return Ok(Self::Loopback);
        }

        if let Some(addr) = input.strip_prefix("tcp://") {
            let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
                AppError::config(format!("TCP transport '{}' must be tcp://host:port", input))
            })?;
            if host.is_empty() {
                return Err(AppError::config(format!("TCP transport '{}' has no host", input)));
            }
            port.parse::<u16>()
                .map_err(|_| AppError::config(format!("TCP transport '{}' has an invalid port", input)))?;
            return Ok(Self::Tcp(addr.to_string()));
        }

        if input.contains("://") {
            return Err(AppError::config(format!(
                "Unsupported transport scheme in '{}' (expected loopback, tcp://host:port or a device path)",
                input
            )));
        }

        Ok(Self::Device(PathBuf::from(input)))
    }

    pub fn is_loopback(&self) -> bool {
        matches!(self, Self::Loopback)
    }
}

impl fmt::Display for TransportSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loopback => f.write_str("loopback"),
            Self::Tcp(addr) => write!(f, "tcp://{}", addr),
            Self::Device(path) => write!(f, "{}", path.display()),
        }
    }
}

type SharedReader = Arc<Mutex<Box<dyn TransportReader>>>;

/// The links of one run: a write side shared by the sender and one read side
/// per receiver
#[derive(Clone)]
pub struct Transport {
    writer: Arc<Mutex<Box<dyn TransportWriter>>>,
    readers: Vec<SharedReader>,
    description: String,
}

impl Transport {
    pub fn new(
        writer: impl TransportWriter + 'static,
        reader: impl TransportReader + 'static,
        description: impl Into<String>,
    ) -> Self {
        Self::from_parts(Box::new(writer), vec![Box::new(reader)], description.into())
    }

    fn from_parts(
        writer: Box<dyn TransportWriter>,
        readers: Vec<Box<dyn TransportReader>>,
        description: String,
    ) -> Self {
        Self {
            writer: Arc::new(Mutex::new(writer)),
            readers: readers.into_iter().map(|r| Arc::new(Mutex::new(r))).collect(),
            description,
        }
    }

    /// In-process link that delivers what is written, after impairments
    pub fn loopback(impairments: ImpairmentConfig) -> Self {
        let (writer, reader) = loopback::link(impairments);
        Self::new(writer, reader, "loopback")
    }

    /// In-process link heard by one receiver per branch
    pub fn loopback_fanout(branches: Vec<ImpairmentConfig>) -> Self {
        if branches.len() <= 1 {
            return Self::loopback(branches.into_iter().next().unwrap_or_default());
        }

        let count = branches.len();
        let (writer, readers) = loopback::fanout(branches);
        let readers = readers
            .into_iter()
            .map(|r| Box::new(r) as Box<dyn TransportReader>)
            .collect();
        Self::from_parts(Box::new(writer), readers, format!("loopback x{}", count))
    }

    /// Open `tx`, reading from the `rx` links instead when any are given.
    ///
    /// `loopback` holds one branch per receiver when `tx` is the loopback link.
    pub async fn open(tx: &TransportSpec, rx: &[TransportSpec], loopback: &[ImpairmentConfig]) -> Result<Self> {
        if tx.is_loopback() || rx.iter().any(TransportSpec::is_loopback) {
            if !rx.is_empty() {
                return Err(AppError::config(
                    "The loopback transport cannot be combined with a separate receive transport",
                ));
            }
            return Ok(Self::loopback_fanout(loopback.to_vec()));
        }

        let (writer, reader) = stream::open(tx).await?;
        if rx.is_empty() {
            return Ok(Self::from_parts(writer, vec![reader], tx.to_string()));
        }

        let mut readers = Vec::with_capacity(rx.len());
        for spec in rx {
            let (_, reader) = stream::open(spec).await?;
            readers.push(reader);
        }
        let targets: Vec<String> = rx.iter().map(ToString::to_string).collect();
        Ok(Self::from_parts(
            writer,
            readers,
            format!("{} -> {}", tx, targets.join(", ")),
        ))
    }

    /// Number of read sides, one per receiver
    pub fn receiver_count(&self) -> usize {
        self.readers.len()
    }

    pub async fn write_all(&self, bytes: &[u8]) -> Result<()> {
        self.writer.lock().await.write_all(bytes).await
    }

    /// Read from the first receiver's link
    pub async fn read_chunk(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.read_chunk_from(0, timeout).await
    }

    pub async fn read_chunk_from(&self, receiver: usize, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let reader = self
            .readers
            .get(receiver)
            .ok_or_else(|| AppError::internal(format!("no receive link {} on {}", receiver, self.description)))?;
        reader.lock().await.read_chunk(timeout).await
    }

    /// Flush stale input on every receive link
    pub async fn drain_input(&self) -> Result<usize> {
        let mut drained = 0;
        for reader in &self.readers {
            drained += reader.lock().await.drain_input().await?;
        }
        Ok(drained)
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("description", &self.description)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transport_specs() {
        assert_eq!(TransportSpec::parse("loopback").unwrap(), TransportSpec::Loopback);
        assert_eq!(
            TransportSpec::parse("tcp://127.0.0.1:4000").unwrap(),
            TransportSpec::Tcp("127.0.0.1:4000".to_string())
        );
        assert_eq!(
            TransportSpec::parse("/dev/ttyUSB0").unwrap(),
            TransportSpec::Device(PathBuf::from("/dev/ttyUSB0"))
        );
    }

    #[test]
    fn test_parse_rejects_bad_specs() {
        assert!(TransportSpec::parse("").is_err());
        assert!(TransportSpec::parse("tcp://nohost").is_err());
        assert!(TransportSpec::parse("tcp://host:notaport").is_err());
        assert!(TransportSpec::parse("udp://host:1").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        for input in ["loopback", "tcp://radio.local:7000", "/dev/ttyS1"] {
            assert_eq!(TransportSpec::parse(input).unwrap().to_string(), input);
        }
    }

    #[tokio::test]
    async fn test_loopback_cannot_split() {
        let err = Transport::open(
            &TransportSpec::Loopback,
            &[TransportSpec::Device(PathBuf::from("/dev/null"))],
            &[],
        )
        .await
        .unwrap_err();
        assert_eq!(err.category(), "CONFIG");
    }

    #[tokio::test(start_paused = true)]
    async fn test_loopback_opens_one_reader_per_branch() {
        let branches = vec![ImpairmentConfig::default(); 3];
        let transport = Transport::open(&TransportSpec::Loopback, &[], &branches).await.unwrap();
        assert_eq!(transport.receiver_count(), 3);
        assert_eq!(transport.description(), "loopback x3");

        transport.write_all(b"frame").await.unwrap();
        for receiver in 0..3 {
            let chunk = transport.read_chunk_from(receiver, Duration::ZERO).await.unwrap();
            assert_eq!(chunk.as_deref(), Some(&b"frame"[..]));
        }
        assert_eq!(transport.read_chunk_from(3, Duration::ZERO).await.unwrap_err().category(), "INTERNAL");
    }
}
