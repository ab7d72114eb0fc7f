//! Receiver role: frame recovery from a raw byte stream
//!
//! Frames carry no length field or delimiter, so boundaries come from the
//! configured payload length alone. [`FrameSync`] holds the unconsumed bytes
//! and classifies each frame-sized window at the head of the buffer:
//!
//! * digest verifies: the frame is aligned. Its sequence is checked against
//!   the first payload byte, which carries the sequence's low byte. A
//!   disagreement means the sequence field was hit, and the frame is counted
//!   as corrupt in the slot its payload names. A timestamp far outside the
//!   receive clock marks the header as damaged too;
//! * a verified frame outside the forward window is held until the next frame
//!   confirms it as a real jump. When the next frame instead continues from
//!   the expected sequence, the held frame was that sequence with its high
//!   sequence bytes damaged;
//! * digest mismatch with an in-window sequence and a plausible timestamp:
//!   accepted as a corrupt packet without resync;
//! * otherwise the head is misaligned: one byte is discarded and the scan
//!   moves on, at most one frame length of discards per buffer fill. When
//!   that budget runs out the whole buffer is dropped.

use super::RoleContext;
use crate::codec::{self, Packet};
use crate::error::{AppError, Result};
use crate::stats::{PacketOutcome, StatsAggregator};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Half the sequence space; offsets beyond it are behind the expected sequence
const BEHIND_THRESHOLD: u32 = 1 << 31;

/// Largest forward window the payload's sequence byte can disambiguate
pub const MAX_SEQUENCE_WINDOW: u32 = 256;

/// How far a send timestamp may lead the receive clock and still count as skew
const MAX_CLOCK_LEAD_SECS: f64 = 0.1;

/// Longest believable transit time
const MAX_LATENCY_SECS: f64 = 60.0;

/// What the framer observed while consuming bytes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameEvent {
    /// A frame was accepted
    Packet(PacketOutcome),
    /// Alignment was recovered after skipping bytes
    Resynced { skipped: usize },
    /// The discard budget ran out; skipped and buffered bytes were dropped
    ResyncFailed { dropped: usize },
    /// An aligned frame was thrown away: stale, or a jump nothing confirmed
    Discarded { bytes: usize },
}

#[derive(Debug, Clone)]
struct HeldFrame {
    packet: Packet,
    received_at: f64,
}

/// Incremental frame recovery for one run
#[derive(Debug, Clone)]
pub struct FrameSync {
    payload_len: usize,
    frame_len: usize,
    window: u32,
    buf: Vec<u8>,
    expected: u32,
    last_timestamp: f64,
    discard_budget: usize,
    discards_this_fill: usize,
    skipped: usize,
    held: Option<HeldFrame>,
}

impl FrameSync {
    /// `window` is clamped to `1..=MAX_SEQUENCE_WINDOW`
    pub fn new(payload_len: usize, window: u32) -> Self {
        let frame_len = codec::frame_len(payload_len);
        Self {
            payload_len,
            frame_len,
            window: window.clamp(1, MAX_SEQUENCE_WINDOW),
            buf: Vec::with_capacity(frame_len * 4),
            expected: 0,
            last_timestamp: 0.0,
            discard_budget: frame_len,
            discards_this_fill: 0,
            skipped: 0,
            held: None,
        }
    }

    /// Sequence the next frame is expected to carry
    pub fn expected_sequence(&self) -> u32 {
        self.expected
    }

    /// Bytes buffered but not yet consumed
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append received bytes and consume every complete frame.
    ///
    /// `received_at` is the local clock reading used for latency.
    pub fn push(&mut self, bytes: &[u8], received_at: f64) -> Vec<FrameEvent> {
        self.buf.extend_from_slice(bytes);
        self.discards_this_fill = 0;

        let mut events = Vec::new();
        let mut consumed = 0;

        while self.buf.len() - consumed >= self.frame_len {
            let packet = match codec::decode(&self.buf[consumed..], self.payload_len) {
                Ok(packet) => packet,
                Err(_) => break,
            };

            if let Some(held) = self.held.take() {
                let successor = (!packet.corrupt).then_some(packet.sequence);
                self.resolve_held(held, successor, &mut events);
            }

            if !packet.corrupt {
                self.flush_skipped(&mut events);
                self.place_verified(packet, received_at, &mut events);
                consumed += self.frame_len;
                continue;
            }

            let offset = packet.sequence.wrapping_sub(self.expected);
            if offset < self.window && self.header_plausible(packet.send_timestamp, received_at) {
                self.flush_skipped(&mut events);
                self.record(packet.sequence, true, None, false, &mut events);
                consumed += self.frame_len;
            } else if self.discards_this_fill < self.discard_budget {
                consumed += 1;
                self.skipped += 1;
                self.discards_this_fill += 1;
            } else {
                let dropped = self.skipped + (self.buf.len() - consumed);
                consumed = self.buf.len();
                self.skipped = 0;
                events.push(FrameEvent::ResyncFailed { dropped });
            }
        }

        self.buf.drain(..consumed);
        events
    }

    /// Resolve a held frame once no more bytes will arrive
    pub fn finish(&mut self) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        if let Some(held) = self.held.take() {
            self.resolve_held(held, None, &mut events);
        }
        events
    }

    fn place_verified(&mut self, packet: Packet, received_at: f64, events: &mut Vec<FrameEvent>) {
        if !self.payload_agrees(&packet, packet.sequence) {
            match self.slot_from_payload(&packet) {
                Some(sequence) => self.record(sequence, true, None, false, events),
                None => events.push(FrameEvent::Discarded { bytes: self.frame_len }),
            }
            return;
        }

        let offset = packet.sequence.wrapping_sub(self.expected);
        if offset < self.window {
            self.accept_verified(&packet, received_at, events);
            return;
        }

        let jump_ahead = offset < BEHIND_THRESHOLD && self.timestamp_believable(packet.send_timestamp, received_at);
        if jump_ahead || self.payload_agrees(&packet, self.expected) {
            self.held = Some(HeldFrame { packet, received_at });
        } else {
            events.push(FrameEvent::Discarded { bytes: self.frame_len });
        }
    }

    fn resolve_held(&mut self, held: HeldFrame, successor: Option<u32>, events: &mut Vec<FrameEvent>) {
        let sequence = held.packet.sequence;
        let ahead = sequence.wrapping_sub(self.expected) < BEHIND_THRESHOLD;

        if ahead && successor == Some(sequence.wrapping_add(1)) {
            self.accept_verified(&held.packet, held.received_at, events);
        } else if self.payload_agrees(&held.packet, self.expected)
            && successor.map_or(true, |next| next == self.expected.wrapping_add(1))
        {
            // Only the high sequence bytes were off; the frame fills the expected slot
            self.record(self.expected, true, None, false, events);
        } else {
            events.push(FrameEvent::Discarded { bytes: self.frame_len });
        }
    }

    fn accept_verified(&mut self, packet: &Packet, received_at: f64, events: &mut Vec<FrameEvent>) {
        let timestamp = packet.send_timestamp;
        if !self.timestamp_believable(timestamp, received_at) {
            self.record(packet.sequence, true, None, false, events);
            return;
        }

        let latency = (received_at - timestamp) * 1000.0;
        if latency < 0.0 {
            self.record(packet.sequence, false, Some(0.0), true, events);
        } else {
            self.last_timestamp = timestamp;
            self.record(packet.sequence, false, Some(latency), false, events);
        }
    }

    fn record(
        &mut self,
        sequence: u32,
        corrupt: bool,
        latency_ms: Option<f64>,
        clock_skew: bool,
        events: &mut Vec<FrameEvent>,
    ) {
        self.expected = sequence.wrapping_add(1);
        self.discards_this_fill = 0;
        events.push(FrameEvent::Packet(PacketOutcome {
            sequence,
            frame_len: self.frame_len,
            corrupt,
            latency_ms,
            clock_skew,
        }));
    }

    /// The payload pattern starts at the sequence's low byte
    fn payload_agrees(&self, packet: &Packet, sequence: u32) -> bool {
        packet.payload.first().map_or(true, |&first| first == sequence as u8)
    }

    /// In-window sequence whose low byte matches the payload
    fn slot_from_payload(&self, packet: &Packet) -> Option<u32> {
        let first = *packet.payload.first()?;
        let offset = u32::from(first.wrapping_sub(self.expected as u8));
        (offset < self.window).then(|| self.expected.wrapping_add(offset))
    }

    /// Sanity bounds on a verified frame's timestamp against the receive clock
    fn timestamp_believable(&self, timestamp: f64, received_at: f64) -> bool {
        timestamp.is_finite()
            && timestamp <= received_at + MAX_CLOCK_LEAD_SECS
            && received_at - timestamp <= MAX_LATENCY_SECS
    }

    /// Whether a frame that failed its digest still has a real header
    fn header_plausible(&self, timestamp: f64, received_at: f64) -> bool {
        self.timestamp_believable(timestamp, received_at) && timestamp >= self.last_timestamp
    }

    fn flush_skipped(&mut self, events: &mut Vec<FrameEvent>) {
        if self.skipped > 0 {
            events.push(FrameEvent::Resynced { skipped: self.skipped });
            self.skipped = 0;
        }
    }
}

/// Read receive link `index` until cancelled, feeding every framer event into
/// that receiver's statistics
pub(crate) async fn run(
    ctx: RoleContext,
    index: usize,
    payload_len: usize,
    window: u32,
    read_timeout: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let role = if ctx.stats.receiver_count() > 1 {
        format!("receiver {}", index + 1)
    } else {
        "receiver".to_string()
    };
    let stats = ctx
        .stats
        .receiver(index)
        .ok_or_else(|| AppError::internal(format!("no statistics for {}", role)))?;
    let mut sync = FrameSync::new(payload_len, window);

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            chunk = ctx.transport.read_chunk_from(index, read_timeout) => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                let events = sync.push(&bytes, ctx.clock.now_secs());
                apply(&ctx, &stats, events).await;
            }
            Ok(None) => continue,
            Err(e) => {
                ctx.logger.transport_error(&ctx.run_id, &role, &e).await;
                ctx.fault.raise(e.clone());
                return Err(e);
            }
        }
    }

    let events = sync.finish();
    apply(&ctx, &stats, events).await;
    Ok(())
}

async fn apply(ctx: &RoleContext, stats: &StatsAggregator, events: Vec<FrameEvent>) {
    for event in events {
        match event {
            FrameEvent::Packet(outcome) => stats.record_received(outcome),
            FrameEvent::Resynced { skipped } => {
                stats.record_discarded(skipped);
                stats.record_resync();
                ctx.logger.resynced(&ctx.run_id, skipped).await;
            }
            FrameEvent::ResyncFailed { dropped } => {
                stats.record_resync_failure(dropped);
                ctx.logger.resync_failed(&ctx.run_id, dropped).await;
            }
            FrameEvent::Discarded { bytes } => stats.record_discarded(bytes),
        }
    }
}
