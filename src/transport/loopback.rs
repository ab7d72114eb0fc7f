//! In-process simulated link with configurable impairments
//!
//! One writer can fan out to several readers, each behind its own branch
//! with its own impairments and RNG, like one master radio heard by several
//! slaves. Every `write_all` call is treated as one frame. The n-th write (counting
//! from 0) can be dropped, have one byte flipped or have one byte removed,
//! either by schedule or with a probability drawn from a seeded RNG. A flip
//! can land anywhere in the frame, header included. Frames arrive after a
//! fixed latency, in write order.

use super::{TransportReader, TransportWriter};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Impairments applied by one branch of the loopback link
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImpairmentConfig {
    /// Probability that a frame is lost entirely
    #[serde(default)]
    pub loss_rate: f64,
    /// Probability that one byte of a frame is flipped
    #[serde(default)]
    pub corrupt_rate: f64,
    /// Byte that corruption flips, clamped to the frame; random when unset
    #[serde(default)]
    pub corrupt_offset: Option<usize>,
    /// Probability that one byte is removed from a frame
    #[serde(default)]
    pub drop_byte_rate: f64,
    /// One-way delay in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// RNG seed; a fresh entropy seed when unset
    #[serde(default)]
    pub seed: Option<u64>,

    /// Writes that are always lost
    #[serde(default)]
    pub drop_writes: Vec<u64>,
    /// Writes that always carry one flipped byte
    #[serde(default)]
    pub corrupt_writes: Vec<u64>,
    /// Writes that always lose one byte
    #[serde(default)]
    pub truncate_writes: Vec<u64>,
    /// Fail every write from this index on
    #[serde(default)]
    pub fail_writes_from: Option<u64>,
}

impl ImpairmentConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("loss rate", self.loss_rate),
            ("corruption rate", self.corrupt_rate),
            ("byte drop rate", self.drop_byte_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(AppError::config(format!(
                    "Loopback {} must be between 0 and 1, got {}",
                    name, rate
                )));
            }
        }
        Ok(())
    }

    /// Whether the link delivers every byte untouched
    pub fn is_clean(&self) -> bool {
        self.loss_rate == 0.0
            && self.corrupt_rate == 0.0
            && self.drop_byte_rate == 0.0
            && self.drop_writes.is_empty()
            && self.corrupt_writes.is_empty()
            && self.truncate_writes.is_empty()
            && self.fail_writes_from.is_none()
    }
}

struct Delivery {
    due: Instant,
    bytes: Vec<u8>,
}

/// Create a connected writer/reader pair
pub fn link(impairments: ImpairmentConfig) -> (LoopbackWriter, LoopbackReader) {
    let (branch, reader) = branch(impairments);
    (
        LoopbackWriter {
            branches: vec![branch],
            writes: 0,
        },
        reader,
    )
}

/// One writer delivering to a reader per branch
pub fn fanout(branches: Vec<ImpairmentConfig>) -> (LoopbackWriter, Vec<LoopbackReader>) {
    let (branches, readers): (Vec<Branch>, Vec<LoopbackReader>) = branches.into_iter().map(branch).unzip();
    (LoopbackWriter { branches, writes: 0 }, readers)
}

fn branch(impairments: ImpairmentConfig) -> (Branch, LoopbackReader) {
    let (tx, rx) = mpsc::unbounded_channel();
    let rng = match impairments.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    (Branch { tx, impairments, rng }, LoopbackReader { rx, pending: None })
}

struct Branch {
    tx: mpsc::UnboundedSender<Delivery>,
    impairments: ImpairmentConfig,
    rng: StdRng,
}

impl Branch {
    fn roll(&mut self, rate: f64) -> bool {
        rate > 0.0 && self.rng.gen::<f64>() < rate
    }

    /// Apply impairments to one frame; `None` means the frame is lost
    fn impair(&mut self, index: u64, bytes: &[u8]) -> Option<Vec<u8>> {
        let scheduled_drop = self.impairments.drop_writes.contains(&index);
        if scheduled_drop || self.roll(self.impairments.loss_rate) {
            return None;
        }

        let mut frame = bytes.to_vec();
        if frame.is_empty() {
            return Some(frame);
        }

        let scheduled_corrupt = self.impairments.corrupt_writes.contains(&index);
        if scheduled_corrupt || self.roll(self.impairments.corrupt_rate) {
            let offset = match self.impairments.corrupt_offset {
                Some(offset) => offset.min(frame.len() - 1),
                None => self.rng.gen_range(0..frame.len()),
            };
            frame[offset] ^= 0xFF;
        }

        let scheduled_truncate = self.impairments.truncate_writes.contains(&index);
        if scheduled_truncate || self.roll(self.impairments.drop_byte_rate) {
            let offset = self.rng.gen_range(0..frame.len());
            frame.remove(offset);
        }

        Some(frame)
    }
}

pub struct LoopbackWriter {
    branches: Vec<Branch>,
    writes: u64,
}

#[async_trait]
impl TransportWriter for LoopbackWriter {
    async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let index = self.writes;
        self.writes += 1;

        let failing = self
            .branches
            .iter()
            .any(|b| b.impairments.fail_writes_from.is_some_and(|from| index >= from));
        if failing {
            return Err(AppError::transport_write(format!(
                "loopback write {} rejected",
                index
            )));
        }

        let now = Instant::now();
        for branch in &mut self.branches {
            let Some(frame) = branch.impair(index, bytes) else {
                continue;
            };
            let due = now + Duration::from_millis(branch.impairments.latency_ms);
            branch
                .tx
                .send(Delivery { due, bytes: frame })
                .map_err(|_| AppError::transport_write("loopback link closed"))?;
        }
        Ok(())
    }
}

pub struct LoopbackReader {
    rx: mpsc::UnboundedReceiver<Delivery>,
    // A frame taken off the channel that is not due yet
    pending: Option<Delivery>,
}

impl LoopbackReader {
    fn take_if_due(&mut self, now: Instant) -> Option<Vec<u8>> {
        match &self.pending {
            Some(delivery) if delivery.due <= now => self.pending.take().map(|d| d.bytes),
            _ => None,
        }
    }
}

#[async_trait]
impl TransportReader for LoopbackReader {
    async fn read_chunk(&mut self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;

        loop {
            if self.pending.is_none() {
                let next = if timeout.is_zero() {
                    match self.rx.try_recv() {
                        Ok(delivery) => Some(delivery),
                        Err(mpsc::error::TryRecvError::Empty) => return Ok(None),
                        Err(mpsc::error::TryRecvError::Disconnected) => None,
                    }
                } else {
                    match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                        Ok(next) => next,
                        Err(_) => return Ok(None),
                    }
                };

                match next {
                    Some(delivery) => self.pending = Some(delivery),
                    None => return Err(AppError::transport_read("loopback link closed")),
                }
            }

            let now = Instant::now();
            if let Some(bytes) = self.take_if_due(now) {
                return Ok(Some(bytes));
            }

            let due = match &self.pending {
                Some(delivery) => delivery.due,
                None => continue,
            };
            if due > deadline {
                tokio::time::sleep_until(deadline).await;
                return Ok(None);
            }
            tokio::time::sleep_until(due).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, encode, payload_for};

    fn frame(seq: u32) -> Vec<u8> {
        encode(seq, 0.0, &payload_for(seq, 32))
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_link_delivers_in_order() {
        let (mut writer, mut reader) = link(ImpairmentConfig::default());
        writer.write_all(&frame(0)).await.unwrap();
        writer.write_all(&frame(1)).await.unwrap();

        let first = reader.read_chunk(Duration::from_millis(10)).await.unwrap().unwrap();
        let second = reader.read_chunk(Duration::from_millis(10)).await.unwrap().unwrap();
        assert_eq!(decode(&first, 32).unwrap().sequence, 0);
        assert_eq!(decode(&second, 32).unwrap().sequence, 1);
        assert!(reader.read_chunk(Duration::from_millis(10)).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_delivery_without_losing_frames() {
        let (mut writer, mut reader) = link(ImpairmentConfig {
            latency_ms: 120,
            ..Default::default()
        });
        writer.write_all(&frame(0)).await.unwrap();

        // Times out while the frame is in flight, then receives it
        assert!(reader.read_chunk(Duration::from_millis(50)).await.unwrap().is_none());
        assert!(reader.read_chunk(Duration::from_millis(50)).await.unwrap().is_none());
        let bytes = reader.read_chunk(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(decode(&bytes, 32).unwrap().sequence, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_impairments() {
        let (mut writer, mut reader) = link(ImpairmentConfig {
            drop_writes: vec![1],
            corrupt_writes: vec![2],
            corrupt_offset: Some(60),
            truncate_writes: vec![3],
            seed: Some(7),
            ..Default::default()
        });
        for seq in 0..4 {
            writer.write_all(&frame(seq)).await.unwrap();
        }

        let clean = reader.read_chunk(Duration::ZERO).await.unwrap().unwrap();
        assert!(!decode(&clean, 32).unwrap().corrupt);

        let corrupt = reader.read_chunk(Duration::ZERO).await.unwrap().unwrap();
        let packet = decode(&corrupt, 32).unwrap();
        assert_eq!(packet.sequence, 2);
        assert!(packet.corrupt);

        let short = reader.read_chunk(Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(short.len(), frame(3).len() - 1);

        assert!(reader.read_chunk(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_corruption_reaches_the_header() {
        let (mut writer, mut reader) = link(ImpairmentConfig {
            corrupt_writes: vec![0],
            corrupt_offset: Some(3),
            ..Default::default()
        });
        writer.write_all(&frame(5)).await.unwrap();

        let bytes = reader.read_chunk(Duration::ZERO).await.unwrap().unwrap();
        let packet = decode(&bytes, 32).unwrap();
        assert_eq!(packet.sequence, 5 ^ 0xFF);
        assert!(!packet.corrupt);
    }

    #[tokio::test(start_paused = true)]
    async fn test_random_corruption_covers_every_region() {
        let (mut writer, mut reader) = link(ImpairmentConfig {
            corrupt_rate: 1.0,
            seed: Some(3),
            ..Default::default()
        });
        let clean = frame(0);
        for _ in 0..400 {
            writer.write_all(&clean).await.unwrap();
        }

        let mut hit = [false; 3];
        while let Some(bytes) = reader.read_chunk(Duration::ZERO).await.unwrap() {
            let offset = bytes.iter().zip(&clean).position(|(a, b)| a != b).unwrap();
            hit[match offset {
                0..=11 => 0,
                12..=43 => 1,
                _ => 2,
            }] = true;
        }
        assert_eq!(hit, [true; 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fanout_branches_are_impaired_independently() {
        let (mut writer, mut readers) = fanout(vec![
            ImpairmentConfig::default(),
            ImpairmentConfig {
                drop_writes: vec![1],
                ..Default::default()
            },
        ]);
        for seq in 0..3 {
            writer.write_all(&frame(seq)).await.unwrap();
        }

        let mut counts = Vec::new();
        for reader in &mut readers {
            let mut count = 0;
            while reader.read_chunk(Duration::ZERO).await.unwrap().is_some() {
                count += 1;
            }
            counts.push(count);
        }
        assert_eq!(counts, vec![3, 2]);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let (mut writer, _reader) = link(ImpairmentConfig {
            fail_writes_from: Some(1),
            ..Default::default()
        });
        writer.write_all(&frame(0)).await.unwrap();
        let err = writer.write_all(&frame(1)).await.unwrap_err();
        assert_eq!(err.category(), "TRANSPORT_WRITE");
    }

    #[tokio::test]
    async fn test_drain_discards_pending_input() {
        let (mut writer, mut reader) = link(ImpairmentConfig::default());
        for seq in 0..3 {
            writer.write_all(&frame(seq)).await.unwrap();
        }
        let drained = reader.drain_input().await.unwrap();
        assert_eq!(drained, frame(0).len() * 3);
        assert!(reader.read_chunk(Duration::ZERO).await.unwrap().is_none());
    }

    #[test]
    fn test_rates_must_be_probabilities() {
        let config = ImpairmentConfig {
            loss_rate: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(ImpairmentConfig::default().is_clean());
    }

    #[tokio::test(start_paused = true)]
    async fn test_seeded_loss_is_repeatable() {
        async fn survivors(seed: u64) -> usize {
            let (mut writer, mut reader) = link(ImpairmentConfig {
                loss_rate: 0.5,
                seed: Some(seed),
                ..Default::default()
            });
            for seq in 0..200 {
                writer.write_all(&frame(seq)).await.unwrap();
            }
            let mut count = 0;
            while reader.read_chunk(Duration::ZERO).await.unwrap().is_some() {
                count += 1;
            }
            count
        }

        let first = survivors(42).await;
        assert_eq!(first, survivors(42).await);
        assert!(first > 50 && first < 150);
    }
}
