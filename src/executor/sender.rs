//! Sender role: paced emission of test frames

use super::RoleContext;
use crate::codec;
use crate::error::Result;
use crate::models::{StopRule, TestConfiguration};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Send frames until the stop rule is met or `cancel` fires.
///
/// Deadlines sit on a fixed grid from the start of the run, so wake-up jitter
/// never accumulates. A write that runs past the next deadline moves the grid
/// to the moment it finished instead of triggering a catch-up burst.
/// Elapsed time is frozen in the run statistics when this returns.
pub(crate) async fn run(
    ctx: RoleContext,
    config: TestConfiguration,
    stop: StopRule,
    cancel: CancellationToken,
) -> Result<()> {
    let result = send_frames(&ctx, &config, stop, &cancel).await;
    ctx.stats.mark_finished();

    if let Err(e) = &result {
        ctx.logger.transport_error(&ctx.run_id, "sender", e).await;
        ctx.fault.raise(e.clone());
    }
    result
}

async fn send_frames(
    ctx: &RoleContext,
    config: &TestConfiguration,
    stop: StopRule,
    cancel: &CancellationToken,
) -> Result<()> {
    let interval = config.write_interval();
    let start = Instant::now();
    let end = match stop {
        StopRule::Duration(duration) => Some(start + duration),
        StopRule::PacketCount(_) => None,
    };

    let mut sequence: u32 = 0;
    let mut sent: u64 = 0;
    let mut next_send = start;

    loop {
        match stop {
            StopRule::PacketCount(count) if sent >= count => break,
            StopRule::Duration(_) if end.is_some_and(|end| next_send >= end) => break,
            _ => {}
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            _ = sleep_until(next_send) => {}
        }

        let send_start = Instant::now();
        let lag = send_start.saturating_duration_since(next_send);
        if lag > interval {
            ctx.logger
                .behind_schedule(&ctx.run_id, sequence, lag.as_secs_f64() * 1000.0)
                .await;
        }

        let payload = codec::payload_for(sequence, config.packet_size);
        let frame = codec::encode(sequence, ctx.clock.now_secs(), &payload);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            written = ctx.transport.write_all(&frame) => written?,
        }

        ctx.stats.record_sent(frame.len());
        sent += 1;
        sequence = sequence.wrapping_add(1);
        next_send += interval;

        let now = Instant::now();
        if now > next_send {
            next_send = now;
        }
    }

    // Duration runs end on the bound; count runs wait out the final interval
    let done_at = end.unwrap_or(next_send);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        _ = sleep_until(done_at) => {}
    }
    Ok(())
}
