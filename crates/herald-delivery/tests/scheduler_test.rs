//! Batch scheduling: claiming, isolation, persistence and the trigger loop.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

mod common;

use std::{sync::Arc, time::Duration};

use common::Harness;
use herald_core::{models::OutboxStatus, Clock};
use herald_delivery::{
    BatchScheduler, BatchSummary, DeliveryError, SchedulerConfig, TriggerLoop,
};
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

async fn respond(h: &Harness, status: u16) {
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&h.server)
        .await;
}

#[tokio::test]
async fn failing_event_walks_retry_schedule_into_dead_letter() {
    let h = Harness::new().await;
    respond(&h, 500).await;
    h.webhook("/hook").await;
    let event = h.event().await;
    let scheduler = h.scheduler(SchedulerConfig::default());

    let start = h.clock.now_utc();
    let summary = scheduler.process_batch(None).await.unwrap();
    assert_eq!(summary.retried, 1);
    let stored = h.stored(&event).await;
    assert_eq!(stored.status, OutboxStatus::Pending);
    assert_eq!(stored.attempts, 1);
    assert_eq!(stored.next_retry_at, start + chrono::Duration::seconds(5));

    // Not due yet.
    assert_eq!(scheduler.process_batch(None).await.unwrap().claimed, 0);

    h.clock.advance(Duration::from_secs(5));
    let second_start = h.clock.now_utc();
    scheduler.process_batch(None).await.unwrap();
    let stored = h.stored(&event).await;
    assert_eq!(stored.attempts, 2);
    assert_eq!(stored.next_retry_at, second_start + chrono::Duration::seconds(10));

    h.clock.advance(Duration::from_secs(10));
    let summary = scheduler.process_batch(None).await.unwrap();
    assert_eq!(summary.dead_lettered, 1);
    let stored = h.stored(&event).await;
    assert_eq!(stored.status, OutboxStatus::Dlq);
    assert_eq!(stored.attempts, 3);

    assert_eq!(h.storage.logs_for(event.id).await.len(), 3);
}

#[tokio::test]
async fn delivered_event_is_not_claimed_again() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.server)
        .await;
    h.webhook("/hook").await;
    let event = h.event().await;
    let scheduler = h.scheduler(SchedulerConfig::default());

    let first = scheduler.process_batch(None).await.unwrap();
    assert_eq!(first, BatchSummary { claimed: 1, delivered: 1, ..BatchSummary::default() });
    assert_eq!(h.stored(&event).await.status, OutboxStatus::Delivered);

    h.clock.advance(Duration::from_secs(3600));
    assert_eq!(scheduler.process_batch(None).await.unwrap().claimed, 0);
}

#[tokio::test]
async fn concurrent_batches_never_share_an_event() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(50)))
        .expect(1)
        .mount(&h.server)
        .await;
    h.webhook("/hook").await;
    let event = h.event().await;

    let a = h.scheduler(SchedulerConfig::default());
    let b = h.scheduler(SchedulerConfig::default());
    let (left, right) = tokio::join!(a.process_batch(None), b.process_batch(None));
    let (left, right) = (left.unwrap(), right.unwrap());

    assert_eq!(left.claimed + right.claimed, 1);
    assert_eq!(left.delivered + right.delivered, 1);
    assert_eq!(h.storage.logs_for(event.id).await.len(), 1);
    assert_eq!(h.stored(&event).await.status, OutboxStatus::Delivered);
}

#[tokio::test]
async fn one_failing_event_does_not_abort_the_batch() {
    let h = Harness::new().await;
    respond(&h, 200).await;
    h.webhook("/hook").await;
    h.storage.fail_lookups_for_topic("invoices").await;
    let broken = h.event_on("invoices").await;
    let healthy = h.event().await;
    let scheduler = h.scheduler(SchedulerConfig::default());

    let summary = scheduler.process_batch(None).await.unwrap();

    assert_eq!(summary.claimed, 2);
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.errored, 1);
    assert_eq!(h.stored(&healthy).await.status, OutboxStatus::Delivered);

    let broken_after = h.stored(&broken).await;
    assert_eq!(broken_after.status, OutboxStatus::Pending);
    assert_eq!(broken_after.attempts, 0);
    assert_eq!(broken_after.next_retry_at, h.clock.now_utc());
    assert_eq!(h.storage.released().await, vec![broken.id]);
}

#[tokio::test]
async fn events_past_the_deadline_are_released_untouched() {
    let h = Harness::new().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.server)
        .await;
    h.webhook("/hook").await;
    let first = h.event().await;
    let second = h.event().await;
    let scheduler = h.scheduler(SchedulerConfig {
        batch_deadline: Duration::ZERO,
        ..SchedulerConfig::default()
    });

    let summary = scheduler.process_batch(None).await.unwrap();

    assert_eq!(summary.claimed, 2);
    assert_eq!(summary.deferred, 2);
    for event in [&first, &second] {
        let stored = h.stored(event).await;
        assert_eq!(stored.status, OutboxStatus::Pending);
        assert_eq!(stored.attempts, 0);
        assert!(stored.is_due(h.clock.now_utc()));
    }
}

#[tokio::test]
async fn explicit_limit_caps_the_claim() {
    let h = Harness::new().await;
    respond(&h, 200).await;
    h.webhook("/hook").await;
    for _ in 0..5 {
        h.event().await;
    }
    let scheduler = h.scheduler(SchedulerConfig::default());

    assert_eq!(scheduler.process_batch(Some(2)).await.unwrap().claimed, 2);
    assert_eq!(scheduler.process_batch(None).await.unwrap().claimed, 3);
}

#[tokio::test]
async fn claim_failure_fails_the_batch() {
    let h = Harness::new().await;
    h.storage.inject_claim_error("connection reset").await;
    let scheduler = h.scheduler(SchedulerConfig::default());

    let result = scheduler.process_batch(None).await;

    assert!(matches!(result, Err(DeliveryError::Storage { .. })));
    let stats = scheduler.worker_stats().await;
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.batches_run, 0);
}

#[tokio::test]
async fn stats_reflect_event_states() {
    let h = Harness::new().await;
    respond(&h, 200).await;
    h.webhook("/hook").await;
    h.event().await;
    h.event_on("unrouted").await;
    let mut dead = h.event().await;
    dead.status = OutboxStatus::Dlq;
    h.storage.insert_event(dead).await;
    let scheduler = h.scheduler(SchedulerConfig::default());

    scheduler.process_batch(None).await.unwrap();
    let counts = scheduler.stats().await.unwrap();

    assert_eq!(counts.delivered, 2);
    assert_eq!(counts.dlq, 1);
    assert_eq!(counts.pending, 0);
    assert_eq!(counts.failed, 0);

    let worker = scheduler.worker_stats().await;
    assert_eq!(worker.batches_run, 1);
    assert_eq!(worker.events_claimed, 2);
    assert_eq!(worker.delivered, 2);
    assert!(worker.last_batch_at.is_some());
}

#[tokio::test]
async fn health_reports_liveness_without_storage() {
    let h = Harness::new().await;
    h.storage.inject_claim_error("database down").await;
    let scheduler = h.scheduler(SchedulerConfig::default());

    let liveness = scheduler.health().await;

    assert!(liveness.alive);
    assert_eq!(liveness.batches_run, 0);
    assert_eq!(h.storage.claim_calls().await, 0);
}

#[tokio::test]
async fn zero_sized_configuration_is_rejected() {
    let h = Harness::new().await;
    let build = |config| {
        BatchScheduler::new(
            Arc::new(h.storage.clone()),
            h.processor(),
            Arc::new(h.clock.clone()),
            config,
        )
    };

    assert!(build(SchedulerConfig { batch_size: 0, ..SchedulerConfig::default() }).is_err());
    assert!(build(SchedulerConfig { concurrency: 0, ..SchedulerConfig::default() }).is_err());
}

#[tokio::test]
async fn trigger_loop_runs_until_cancelled() {
    let h = Harness::new().await;
    respond(&h, 200).await;
    h.webhook("/hook").await;
    let event = h.event().await;
    let scheduler = h.scheduler(SchedulerConfig::default());
    let token = CancellationToken::new();

    let trigger = TriggerLoop::new(
        scheduler.clone(),
        Duration::from_secs(1),
        Arc::new(h.clock.clone()),
        token.clone(),
    );
    let handle = tokio::spawn(trigger.run());

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.storage.claim_calls().await < 3 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("trigger loop should keep claiming");

    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("trigger loop should stop after cancellation")
        .unwrap();

    assert_eq!(h.stored(&event).await.status, OutboxStatus::Delivered);
    assert!(scheduler.worker_stats().await.batches_run >= 3);
    assert_eq!(h.storage.logs_for(event.id).await.len(), 1);
}
