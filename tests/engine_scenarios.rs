//! End-to-end runs over the in-process loopback link
//!
//! Most runs pause time, so they complete instantly and timings are exact.

use link_rate_tester::{
    ImpairmentConfig, RunController, RunOptions, RunResult, RunState, TestConfiguration, Transport,
};

async fn run(config: TestConfiguration, impairments: ImpairmentConfig) -> RunResult {
    RunController::new(RunOptions::default())
        .run(config, Transport::loopback(impairments))
        .await
        .expect("run should start")
}

fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-6
}

#[tokio::test(start_paused = true)]
async fn clean_ten_second_run_at_700_bytes() {
    let result = run(
        TestConfiguration::with_duration(700, 0.1, 10.0),
        ImpairmentConfig::default(),
    )
    .await;

    assert_eq!(result.state, RunState::Completed);
    let stats = &result.stats;
    assert_eq!(stats.packets_sent, 100);
    assert_eq!(stats.packets_received, 100);
    assert_eq!(stats.packets_missing, 0);
    assert_eq!(stats.loss_rate, 0.0);
    assert_eq!(stats.corruption_rate, 0.0);
    assert!(approx(stats.elapsed_secs, 10.0), "elapsed {}", stats.elapsed_secs);
    assert!(approx(stats.speed_total, 744.0 * 100.0 / 10.0), "speed {}", stats.speed_total);
    assert!(approx(stats.speed_valid, stats.speed_total));
    assert!(result.error.is_none());
}

#[tokio::test(start_paused = true)]
async fn single_corrupt_frame_is_not_counted_as_loss() {
    let result = run(
        TestConfiguration::with_count(200, 0.05, 20),
        ImpairmentConfig {
            corrupt_writes: vec![5],
            corrupt_offset: Some(150),
            ..Default::default()
        },
    )
    .await;

    let stats = &result.stats;
    assert_eq!(result.state, RunState::Completed);
    assert_eq!(stats.packets_corrupt, 1);
    assert_eq!(stats.packets_received, 20);
    assert_eq!(stats.packets_missing, 0);
    assert_eq!(stats.loss_rate, 0.0);
    assert!(approx(stats.corruption_rate, 1.0 / 20.0));
    assert_eq!(stats.bytes_valid, stats.bytes_received - 244);
    assert!(stats.speed_valid < stats.speed_total);
}

#[tokio::test(start_paused = true)]
async fn one_flipped_byte_anywhere_costs_one_packet() {
    let frame_len = TestConfiguration::with_count(16, 0.05, 12).frame_len();

    for offset in 0..frame_len {
        let result = run(
            TestConfiguration::with_count(16, 0.05, 12),
            ImpairmentConfig {
                corrupt_writes: vec![5],
                corrupt_offset: Some(offset),
                ..Default::default()
            },
        )
        .await;

        let stats = &result.stats;
        assert_eq!(stats.packets_received, 12, "offset {}: {:?}", offset, stats);
        assert_eq!(stats.packets_missing, 0, "offset {}: {:?}", offset, stats);
        // Timestamp bytes are outside the digest; a shift there can pass as real
        if (4..12).contains(&offset) {
            assert!(stats.packets_corrupt <= 1, "offset {}: {:?}", offset, stats);
        } else {
            assert_eq!(stats.packets_corrupt, 1, "offset {}: {:?}", offset, stats);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn dropped_frames_show_up_as_loss() {
    let result = run(
        TestConfiguration::with_count(100, 0.05, 20),
        ImpairmentConfig {
            drop_writes: vec![3, 7],
            ..Default::default()
        },
    )
    .await;

    let stats = &result.stats;
    assert_eq!(stats.packets_sent, 20);
    assert_eq!(stats.packets_received, 18);
    assert_eq!(stats.packets_missing, 2);
    assert!(approx(stats.loss_rate, 2.0 / 20.0));
    assert_eq!(stats.resync_events, 0);
}

#[tokio::test(start_paused = true)]
async fn trailing_loss_is_accounted_at_the_end() {
    let result = run(
        TestConfiguration::with_count(100, 0.05, 10),
        ImpairmentConfig {
            drop_writes: vec![8, 9],
            ..Default::default()
        },
    )
    .await;

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.stats.packets_received, 8);
    assert_eq!(result.stats.packets_missing, 2);
    assert!(approx(result.stats.loss_rate, 0.2));
}

#[tokio::test(start_paused = true)]
async fn lost_byte_forces_a_resync() {
    let result = run(
        TestConfiguration::with_count(300, 0.05, 20),
        ImpairmentConfig {
            truncate_writes: vec![4],
            seed: Some(11),
            ..Default::default()
        },
    )
    .await;

    let stats = &result.stats;
    assert_eq!(result.state, RunState::Completed);
    assert!(stats.resync_events >= 1, "{:?}", stats);
    assert!(stats.bytes_discarded > 0);
    assert_eq!(stats.packets_received + stats.packets_missing, 20);
    // At most the short frame and its neighbour are lost
    assert!(stats.packets_received >= 18, "{:?}", stats);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn real_clock_run_holds_the_send_grid() {
    let result = run(
        TestConfiguration::with_duration(100, 0.01, 2.0),
        ImpairmentConfig::default(),
    )
    .await;

    let stats = &result.stats;
    assert_eq!(result.state, RunState::Completed);
    // Wake-up jitter must not push later sends back
    assert!((195..=200).contains(&stats.packets_sent), "sent {}", stats.packets_sent);
    assert_eq!(stats.packets_received, stats.packets_sent);
    assert_eq!(stats.packets_missing, 0);
}

#[tokio::test(start_paused = true)]
async fn link_latency_is_measured() {
    let result = run(
        TestConfiguration::with_count(64, 0.1, 10),
        ImpairmentConfig {
            latency_ms: 25,
            ..Default::default()
        },
    )
    .await;

    let stats = &result.stats;
    assert_eq!(stats.packets_received, 10);
    assert_eq!(stats.latency_samples, 10);
    let avg = stats.latency_avg_ms.expect("latency samples");
    assert!((avg - 25.0).abs() < 1e-3, "avg {}", avg);
    assert!(stats.latency_min_ms.unwrap() <= avg);
    assert!(stats.latency_max_ms.unwrap() >= avg);
    assert_eq!(stats.clock_skew_samples, 0);
}

#[tokio::test(start_paused = true)]
async fn random_loss_is_fully_accounted() {
    let result = run(
        TestConfiguration::with_count(50, 0.01, 200),
        ImpairmentConfig {
            loss_rate: 0.3,
            seed: Some(42),
            ..Default::default()
        },
    )
    .await;

    let stats = &result.stats;
    assert_eq!(stats.packets_sent, 200);
    assert_eq!(stats.packets_received + stats.packets_missing, 200);
    assert!(stats.loss_rate > 0.15 && stats.loss_rate < 0.45, "loss {}", stats.loss_rate);
    assert!(stats.speed_valid <= stats.speed_total);
    assert!(stats.speed_total <= stats.send_rate);
}

#[tokio::test(start_paused = true)]
async fn write_failure_keeps_partial_counters() {
    let mut controller = RunController::new(RunOptions::default());
    let result = controller
        .run(
            TestConfiguration::with_count(64, 0.05, 20),
            Transport::loopback(ImpairmentConfig {
                fail_writes_from: Some(5),
                ..Default::default()
            }),
        )
        .await
        .unwrap();

    assert_eq!(result.state, RunState::Failed);
    assert_eq!(result.stats.packets_sent, 5);
    assert!(result.error.as_deref().unwrap_or_default().contains("rejected"));

    // Asking again returns the same outcome
    let again = controller.result();
    assert_eq!(again.state, RunState::Failed);
    assert_eq!(again.stats, result.stats);
}

#[tokio::test(start_paused = true)]
async fn invalid_configuration_never_starts() {
    let mut controller = RunController::new(RunOptions::default());
    let config = TestConfiguration {
        packet_size: 700,
        write_interval_secs: 0.0,
        test_duration_secs: Some(1.0),
        packet_count: None,
    };

    let err = controller
        .run(config, Transport::loopback(ImpairmentConfig::default()))
        .await
        .unwrap_err();
    assert_eq!(err.category(), "INVALID_CONFIG");
    assert_eq!(controller.state(), RunState::Idle);
}

#[tokio::test(start_paused = true)]
async fn live_snapshots_only_grow() {
    let mut controller = RunController::new(RunOptions::default());
    let mut snapshots = controller.subscribe();
    controller
        .start(
            TestConfiguration::with_duration(128, 0.05, 2.0),
            Transport::loopback(ImpairmentConfig::default()),
        )
        .await
        .unwrap();

    let collector = tokio::spawn(async move {
        let mut seen = Vec::new();
        while snapshots.changed().await.is_ok() {
            seen.push(snapshots.borrow_and_update().packets_sent);
        }
        seen
    });

    let result = controller.wait().await;
    drop(controller);
    let seen = collector.await.unwrap();

    assert!(seen.len() > 2);
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(seen.last().copied(), Some(result.stats.packets_sent));
}
