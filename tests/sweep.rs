//! Sweeps over the loopback link with paused time

use link_rate_tester::executor::{ArtifactFilter, SweepProgressEvent};
use link_rate_tester::{
    ImpairmentConfig, RunOptions, RunState, SweepOrchestrator, SweepPlan, Transport, VaryMode,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

fn orchestrator() -> SweepOrchestrator {
    SweepOrchestrator::new(RunOptions::default()).with_settle_delay(Duration::from_millis(200))
}

#[tokio::test(start_paused = true)]
async fn full_matrix_runs_in_order() {
    let plan = SweepPlan::new(vec![500, 600, 700], vec![0.1, 0.2]).with_packet_count(10);
    let transport = Transport::loopback(ImpairmentConfig::default());

    let report = orchestrator().run(&plan, &transport).await.unwrap();

    let pairs: Vec<(usize, f64)> = report
        .points
        .iter()
        .map(|p| (p.packet_size, p.write_interval_secs))
        .collect();
    assert_eq!(
        pairs,
        vec![(500, 0.1), (500, 0.2), (600, 0.1), (600, 0.2), (700, 0.1), (700, 0.2)]
    );
    assert!(!report.cancelled);
    assert_eq!(report.skipped_points, 0);

    for (index, point) in report.points.iter().enumerate() {
        assert_eq!(point.index, index);
        assert_eq!(point.result.state, RunState::Completed);
        assert_eq!(point.result.config.packet_size, point.packet_size);
        assert_eq!(point.result.stats.packets_received, 10);
        assert!(!point.excluded);
    }
}

#[tokio::test(start_paused = true)]
async fn ten_percent_loss_row_is_kept_but_excluded() {
    let plan = SweepPlan::new(vec![100, 200], vec![0.05]).with_packet_count(10);
    // Write indices run on across points: the second point owns writes 10..19
    let transport = Transport::loopback(ImpairmentConfig {
        drop_writes: vec![12],
        ..Default::default()
    });

    let report = orchestrator().run(&plan, &transport).await.unwrap();

    assert_eq!(report.points.len(), 2);
    let clean = &report.points[0];
    let lossy = &report.points[1];

    assert!(!clean.excluded);
    assert_eq!(clean.result.stats.loss_rate, 0.0);

    assert!(lossy.excluded);
    assert_eq!(lossy.packet_size, 200);
    assert_eq!(lossy.result.stats.packets_missing, 1);
    assert!((lossy.result.stats.loss_rate - 0.10).abs() < 1e-12);
    assert!(lossy.exclusion_reason.as_deref().unwrap().contains("10.0%"));

    assert_eq!(report.excluded_count(), 1);
    assert_eq!(report.included().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_filter_keeps_every_row_included() {
    let plan = SweepPlan::new(vec![100, 200], vec![0.05]).with_packet_count(10);
    let transport = Transport::loopback(ImpairmentConfig {
        drop_writes: vec![12],
        ..Default::default()
    });

    let report = orchestrator()
        .with_filter(ArtifactFilter::disabled())
        .run(&plan, &transport)
        .await
        .unwrap();

    assert_eq!(report.excluded_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_points_are_recorded_and_the_sweep_continues() {
    let plan = SweepPlan::new(vec![64, 128], vec![0.05]).with_packet_count(5);
    let transport = Transport::loopback(ImpairmentConfig {
        fail_writes_from: Some(3),
        ..Default::default()
    });

    let report = orchestrator().run(&plan, &transport).await.unwrap();

    assert_eq!(report.points.len(), 2);
    assert_eq!(report.failed_count(), 2);
    assert_eq!(report.points[0].result.stats.packets_sent, 3);
    assert_eq!(report.points[1].result.stats.packets_sent, 0);
    assert!(report.points.iter().all(|p| p.result.error.is_some()));
}

#[tokio::test(start_paused = true)]
async fn repeats_and_vary_mode_shape_the_table() {
    let plan = SweepPlan::new(vec![100, 200], vec![0.05, 0.1])
        .with_vary(VaryMode::PacketSize)
        .with_repeats(2)
        .with_packet_count(4);
    let transport = Transport::loopback(ImpairmentConfig::default());

    let report = orchestrator().run(&plan, &transport).await.unwrap();

    let rows: Vec<(usize, u32)> = report.points.iter().map(|p| (p.packet_size, p.repeat)).collect();
    assert_eq!(rows, vec![(100, 0), (100, 1), (200, 0), (200, 1)]);
    assert!(report.points.iter().all(|p| p.write_interval_secs == 0.05));
}

#[tokio::test(start_paused = true)]
async fn cancelling_mid_point_keeps_the_partial_row() {
    let plan = SweepPlan::new(vec![100, 200, 300], vec![0.1]).with_packet_count(10);
    let transport = Transport::loopback(ImpairmentConfig::default());

    let orchestrator = orchestrator();
    let token = orchestrator.cancellation_token();
    // First point ends at 1.0s, the second starts after the 200ms settle
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(1550)).await;
        token.cancel();
    });

    let report = orchestrator.run(&plan, &transport).await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.points.len(), 2);
    assert_eq!(report.skipped_points, 1);
    assert_eq!(report.points[0].result.state, RunState::Completed);

    let partial = &report.points[1].result;
    assert_eq!(partial.state, RunState::Stopped);
    assert!(partial.stats.packets_sent > 0 && partial.stats.packets_sent < 10);
}

#[tokio::test(start_paused = true)]
async fn slow_point_is_cut_off_by_the_watchdog() {
    let plan = SweepPlan::new(vec![100], vec![0.5]).with_duration(60.0);
    let transport = Transport::loopback(ImpairmentConfig::default());

    let report = orchestrator()
        .with_max_point_duration(Duration::from_secs(2))
        .run(&plan, &transport)
        .await
        .unwrap();

    assert!(!report.cancelled);
    let result = &report.points[0].result;
    assert_eq!(result.state, RunState::Stopped);
    assert!(result.error.as_deref().unwrap().contains("maximum duration"));
    assert!(result.stats.packets_sent <= 5);
}

#[tokio::test(start_paused = true)]
async fn progress_events_bracket_every_point() {
    let plan = SweepPlan::new(vec![100, 200], vec![0.05]).with_packet_count(3);
    let transport = Transport::loopback(ImpairmentConfig::default());
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    orchestrator()
        .with_callback(move |event: SweepProgressEvent| {
            let label = match event {
                SweepProgressEvent::PointStarted { current, .. } => format!("start {}", current),
                SweepProgressEvent::PointFinished { current, .. } => format!("finish {}", current),
                SweepProgressEvent::SweepCompleted { points_run, .. } => format!("done {}", points_run),
            };
            sink.lock().push(label);
        })
        .run(&plan, &transport)
        .await
        .unwrap();

    assert_eq!(
        *events.lock(),
        vec!["start 1", "finish 1", "start 2", "finish 2", "done 2"]
    );
}
