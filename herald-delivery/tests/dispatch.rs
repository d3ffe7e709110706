//! End-to-end dispatch behaviour against the in-memory store
#![allow(clippy::unwrap_used, clippy::expect_used)]

mod support;

use std::{sync::Arc, time::Duration};

use chrono::TimeDelta;
use herald_common::{
    Campaign, CampaignStatus, DeliveryRecord, RecordKey, RecordStatus, SubscriberStatus,
};
use herald_delivery::{
    DispatchConfig, DispatchControl, DispatchError, QueueError, RateLimitConfig, RetryPolicy,
    SendOutcome, ServiceConfig, StopReason, TickOutcome,
};
use herald_store::{FaultyStore, MemoryStore, Store};
use pretty_assertions::assert_eq;
use support::{Harness, ScriptedTransport, config, email, start_time};

fn transient(reason: &str) -> SendOutcome {
    SendOutcome::TransientFailure(reason.to_string())
}

fn permanent(reason: &str) -> SendOutcome {
    SendOutcome::PermanentFailure(reason.to_string())
}

#[tokio::test]
async fn test_enqueue_is_idempotent() {
    let h = Harness::new(config());
    h.subscribers(5).await;
    let id = h.ready_campaign().await;

    let report = h.service.enqueue(id).await.unwrap();
    assert_eq!(report.inserted, 5);

    let err = h.service.enqueue(id).await.unwrap_err();
    assert!(matches!(err, QueueError::AlreadyEnqueued { .. }));
    assert_eq!(h.store.records_for_campaign(id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_rate_limit_caps_a_tick() {
    let h = Harness::new(ServiceConfig {
        dispatch: DispatchConfig {
            batch_size: 100,
            ..DispatchConfig::default()
        },
        rate_limit: RateLimitConfig {
            messages_per_second: 50.0,
            burst_size: 50,
            persist: true,
        },
        ..ServiceConfig::default()
    });
    h.subscribers(1000).await;
    let id = h.ready_campaign().await;
    h.service.enqueue(id).await.unwrap();

    let report = h.service.process_now(Some(id)).await.unwrap();
    assert_eq!(report.outcome, TickOutcome::Completed);
    assert_eq!(report.delivered, 50);
    assert_eq!(report.remaining, 950);
    assert_eq!(report.stop_reason, Some(StopReason::RateLimited));
    assert_eq!(h.transport.sent_count(), 50);

    // The bucket is persisted, so an immediate second tick sends nothing.
    let report = h.service.process_now(Some(id)).await.unwrap();
    assert_eq!(report.delivered, 0);

    h.clock.advance(TimeDelta::seconds(1));
    let report = h.service.process_now(Some(id)).await.unwrap();
    assert_eq!(report.delivered, 50);
    assert_eq!(report.remaining, 900);

    let campaign = h.campaign(id).await;
    assert_eq!(campaign.status, CampaignStatus::Sending);
    assert_eq!(campaign.counters.total_sent, 100);
}

#[tokio::test]
async fn test_status_counts_are_conserved() {
    let h = Harness::new(config());
    let ids = h.subscribers(20).await;
    h.transport.script(&email(3), [transient("421 busy")]);
    h.transport.script(&email(4), [permanent("550 5.1.1 unknown")]);
    h.store
        .mark_subscriber(ids[0], SubscriberStatus::Inactive)
        .await
        .unwrap();
    let id = h.ready_campaign().await;

    let enqueued = h.service.enqueue(id).await.unwrap();
    h.service.process_now(Some(id)).await.unwrap();

    let status = h.service.queue_status(Some(id)).await.unwrap();
    assert_eq!(status.total, enqueued.inserted as u64);
    assert_eq!(
        status.pending + status.sending + status.sent + status.failed + status.skipped,
        status.total
    );
    assert_eq!(status.failed, 1);
    assert_eq!(status.pending, 1);
}

#[tokio::test]
async fn test_permanent_failure_bounces_subscriber() {
    let h = Harness::new(config());
    let ids = h.subscribers(3).await;
    h.transport
        .script(&email(1), [permanent("550 5.1.1 user unknown")]);
    let first = h.ready_campaign().await;

    let report = h.service.process_now(Some(first)).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, 1);

    let record = h
        .store
        .record(RecordKey::new(first, ids[1]))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, RecordStatus::Failed);
    assert_eq!(
        record.last_error.as_deref(),
        Some("550 5.1.1 user unknown")
    );

    let subscriber = h.store.subscriber(ids[1]).await.unwrap().unwrap();
    assert_eq!(subscriber.status, SubscriberStatus::Bounced);

    let second = h.ready_campaign().await;
    let report = h.service.enqueue(second).await.unwrap();
    assert_eq!(report.eligible, 2);
    assert!(
        h.store
            .record(RecordKey::new(second, ids[1]))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_transient_failure_waits_for_backoff() {
    let h = Harness::new(config());
    let ids = h.subscribers(1).await;
    h.transport.script(&email(0), [transient("421 try later")]);
    let id = h.ready_campaign().await;

    let report = h.service.process_now(Some(id)).await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.remaining, 1);

    let record = h.store.record(RecordKey::new(id, ids[0])).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Pending);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.next_attempt_at, Some(start_time() + TimeDelta::seconds(60)));

    // Still inside the backoff window.
    h.clock.advance(TimeDelta::seconds(30));
    let report = h.service.process_now(Some(id)).await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(h.transport.sent_count(), 1);

    h.clock.advance(TimeDelta::seconds(31));
    let report = h.service.process_now(Some(id)).await.unwrap();
    assert_eq!(report.delivered, 1);
    assert_eq!(report.finished_campaigns, vec![(id, CampaignStatus::Sent)]);

    let record = h.store.record(RecordKey::new(id, ids[0])).await.unwrap().unwrap();
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.status, RecordStatus::Sent);
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_campaign() {
    let h = Harness::new(ServiceConfig {
        retry: RetryPolicy {
            max_attempts: 2,
            ..RetryPolicy::default()
        },
        ..config()
    });
    h.subscribers(1).await;
    h.transport
        .script(&email(0), [transient("421 busy"), transient("421 busy")]);
    let id = h.ready_campaign().await;

    let report = h.service.process_now(Some(id)).await.unwrap();
    assert_eq!(report.retried, 1);

    h.clock.advance(TimeDelta::seconds(61));
    let report = h.service.process_now(Some(id)).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.finished_campaigns, vec![(id, CampaignStatus::Failed)]);

    let campaign = h.campaign(id).await;
    assert_eq!(campaign.status, CampaignStatus::Failed);
    assert_eq!(campaign.counters.total_sent, 0);
    assert!(campaign.sent_at.is_some());

    // Transient failures never bounce.
    let subscriber = &h.store.subscribers().await.unwrap()[0];
    assert_eq!(subscriber.status, SubscriberStatus::Active);
}

#[tokio::test]
async fn test_pause_stops_before_next_send() {
    let h = Harness::new(config());
    h.subscribers(10).await;
    let id = h.ready_campaign().await;
    h.service.enqueue(id).await.unwrap();
    h.transport.pause_after(3, h.store.clone(), id);

    let report = h.service.process_now(Some(id)).await.unwrap();
    assert_eq!(report.delivered, 3);
    assert_eq!(report.stop_reason, Some(StopReason::Paused));
    assert_eq!(report.remaining, 7);
    assert_eq!(h.transport.sent_count(), 3);
    assert_eq!(h.campaign(id).await.status, CampaignStatus::Paused);

    // A paused campaign is left alone by ordinary ticks.
    let report = h.service.process_now(None).await.unwrap();
    assert_eq!(report.processed, 0);

    h.service.resume(id).await.unwrap();
    let report = h.service.process_now(None).await.unwrap();
    assert_eq!(report.delivered, 7);

    let campaign = h.campaign(id).await;
    assert_eq!(campaign.status, CampaignStatus::Sent);
    assert_eq!(campaign.counters.total_sent, 10);
}

#[tokio::test]
async fn test_pause_requires_sending() {
    let h = Harness::new(config());
    let id = h.ready_campaign().await;

    let err = h.service.pause(id).await.unwrap_err();
    assert!(matches!(err, DispatchError::InvalidTransition(_)));
    assert_eq!(
        err.to_string(),
        "Invalid campaign transition from ready to paused"
    );

    let err = h
        .service
        .pause(herald_common::CampaignId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::CampaignNotFound(_)));
}

#[tokio::test]
async fn test_concurrent_ticks_are_mutually_exclusive() {
    let clock = Arc::new(herald_common::ManualClock::new(start_time()));
    let h = Harness::build(
        Arc::new(MemoryStore::new()),
        clock,
        ScriptedTransport::new().with_delay(Duration::from_millis(20)),
        config(),
    );
    h.subscribers(5).await;
    let id = h.ready_campaign().await;
    h.service.enqueue(id).await.unwrap();

    let (first, second) = tokio::join!(
        h.service.process_now(None),
        h.service.process_now(None)
    );
    let outcomes = [first.unwrap().outcome, second.unwrap().outcome];

    assert_eq!(
        outcomes
            .iter()
            .filter(|o| **o == TickOutcome::SkippedLocked)
            .count(),
        1
    );
    assert_eq!(h.transport.sent_count(), 5);
    assert!(h.service.dispatcher().lock().state().await.unwrap().is_none());
}

#[tokio::test]
async fn test_time_budget_ends_tick() {
    let clock = Arc::new(herald_common::ManualClock::new(start_time()));
    let h = Harness::build(
        Arc::new(MemoryStore::new()),
        clock.clone(),
        ScriptedTransport::new().with_clock_step(clock, TimeDelta::seconds(20)),
        ServiceConfig {
            dispatch: DispatchConfig {
                time_budget_secs: 50,
                ..DispatchConfig::default()
            },
            ..config()
        },
    );
    h.subscribers(10).await;
    let id = h.ready_campaign().await;

    let report = h.service.process_now(Some(id)).await.unwrap();
    assert_eq!(report.delivered, 3);
    assert_eq!(report.stop_reason, Some(StopReason::TimeBudget));
    assert_eq!(report.remaining, 7);
}

#[tokio::test]
async fn test_unbounded_durations_saturate() {
    let h = Harness::new(ServiceConfig {
        dispatch: DispatchConfig {
            time_budget_secs: u64::MAX,
            stale_sending_after_secs: u64::MAX,
            lock_ttl_secs: u64::MAX,
            ..DispatchConfig::default()
        },
        ..config()
    });
    h.subscribers(3).await;
    let id = h.ready_campaign().await;
    h.service.enqueue(id).await.unwrap();

    let report = h.service.process_now(Some(id)).await.unwrap();
    assert!(report.success());
    assert_eq!(report.requeued_stale, 0);
    assert_eq!(report.delivered, 3);
    assert!(h.service.dispatcher().lock().state().await.unwrap().is_none());
}

#[tokio::test]
async fn test_deactivated_subscriber_is_skipped() {
    let h = Harness::new(config());
    let ids = h.subscribers(3).await;
    let id = h.ready_campaign().await;
    h.service.enqueue(id).await.unwrap();

    assert!(h.service.unsubscribe(ids[2], None).await.unwrap());

    let report = h.service.process_now(Some(id)).await.unwrap();
    assert_eq!(report.delivered, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(h.transport.sent_to(&email(2)), 0);

    let record = h.store.record(RecordKey::new(id, ids[2])).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Skipped);
    assert_eq!(record.last_error.as_deref(), Some("subscriber is unsubscribed"));

    let campaign = h.campaign(id).await;
    assert_eq!(campaign.status, CampaignStatus::Sent);
    assert_eq!(campaign.counters.total_sent, 2);
}

#[tokio::test]
async fn test_failed_outcome_write_returns_record_to_pending() {
    let faulty = FaultyStore::default();
    let h = Harness::with_store(Arc::new(faulty.clone()), config());
    h.subscribers(3).await;
    let id = h.ready_campaign().await;
    h.service.enqueue(id).await.unwrap();

    // Lock, stale sweep and the first claim succeed; the first outcome write
    // fails and the store recovers straight after.
    faulty.fail_one_write_after(3);
    let report = h.service.process_now(Some(id)).await.unwrap();
    assert!(matches!(report.outcome, TickOutcome::Failed(_)));
    assert!(h.service.dispatcher().lock().state().await.unwrap().is_none());

    let counts = h.store.count_by_status(Some(id)).await.unwrap();
    assert_eq!(counts.sending, 0);
    assert_eq!(counts.pending, 3);

    faulty.heal();
    let report = h.service.process_now(Some(id)).await.unwrap();
    assert!(report.success());
    assert_eq!(report.requeued_stale, 0);
    assert_eq!(report.delivered, 3);
    assert_eq!(h.campaign(id).await.status, CampaignStatus::Sent);
}

#[tokio::test]
async fn test_store_outage_aborts_tick_and_releases_lock() {
    let faulty = FaultyStore::default();
    let h = Harness::with_store(Arc::new(faulty.clone()), config());
    h.subscribers(3).await;
    let id = h.ready_campaign().await;
    h.service.enqueue(id).await.unwrap();

    // Lock, stale sweep and the first "sending" claim succeed; every write
    // after that fails, including the release of the claim.
    faulty.fail_writes_after(3);
    let report = h.service.process_now(Some(id)).await.unwrap();
    assert!(!report.success());
    assert!(matches!(report.outcome, TickOutcome::Failed(_)));
    assert!(h.service.dispatcher().lock().state().await.unwrap().is_none());

    faulty.heal();
    let counts = h.store.count_by_status(Some(id)).await.unwrap();
    assert_eq!(counts.sending, 1);
    assert_eq!(counts.pending, 2);

    // The stranded record comes back once it is stale.
    h.clock.advance(TimeDelta::seconds(901));
    let report = h.service.process_now(Some(id)).await.unwrap();
    assert!(report.success());
    assert_eq!(report.requeued_stale, 1);
    assert_eq!(report.delivered, 3);
    assert_eq!(h.campaign(id).await.status, CampaignStatus::Sent);
}

#[tokio::test]
async fn test_store_unavailable_before_lock() {
    let faulty = FaultyStore::default();
    let h = Harness::with_store(Arc::new(faulty.clone()), config());

    faulty.set_unavailable(true);
    let report = h.service.process_now(None).await.unwrap();
    assert!(!report.success());
    assert_eq!(report.processed, 0);
}

#[tokio::test]
async fn test_clear_queue_keeps_unfinished_records() {
    let h = Harness::new(config());
    h.subscribers(15).await;
    for i in 0..3 {
        h.transport.script(&email(i), [transient("421 busy")]);
    }
    for i in 3..5 {
        h.transport.script(&email(i), [permanent("550 unknown")]);
    }
    let id = h.ready_campaign().await;

    h.service.process_now(Some(id)).await.unwrap();
    let status = h.service.queue_status(Some(id)).await.unwrap();
    assert_eq!((status.sent, status.failed, status.pending), (10, 2, 3));

    h.clock.advance(TimeDelta::days(31));
    let cleared = h.service.clear_queue().await.unwrap();
    assert_eq!(cleared.removed, 12);

    let status = h.service.queue_status(Some(id)).await.unwrap();
    assert_eq!(status.pending, 3);
    assert_eq!(status.total, 3);

    let campaign = h.campaign(id).await;
    assert_eq!(campaign.archived.sent, 10);
    assert_eq!(campaign.archived.failed, 2);
    assert_eq!(campaign.counters.total_sent, 10);
}

#[tokio::test]
async fn test_clear_queue_respects_retention() {
    let h = Harness::new(config());
    h.subscribers(2).await;
    let id = h.ready_campaign().await;
    h.service.process_now(Some(id)).await.unwrap();

    h.clock.advance(TimeDelta::days(29));
    assert_eq!(h.service.clear_queue().await.unwrap().removed, 0);
}

#[tokio::test]
async fn test_scheduled_campaign_is_promoted_by_tick() {
    let h = Harness::new(config());
    h.subscribers(2).await;
    let campaign = Campaign::new("Later", "<p>soon</p>", h.now())
        .with_status(CampaignStatus::Ready)
        .scheduled_for(h.now() + TimeDelta::hours(1));
    let id = campaign.id;
    h.service.add_campaign(campaign).await.unwrap();

    let scheduled = h.service.tick().await;
    assert!(scheduled.enqueued.is_empty());
    assert_eq!(scheduled.tick.processed, 0);

    h.clock.advance(TimeDelta::hours(1));
    let scheduled = h.service.tick().await;
    assert_eq!(scheduled.enqueued.len(), 1);
    assert_eq!(scheduled.tick.delivered, 2);
    assert_eq!(h.campaign(id).await.status, CampaignStatus::Sent);
}

#[tokio::test]
async fn test_campaign_without_audience_finishes_immediately() {
    let h = Harness::new(config());
    let id = h.ready_campaign().await;

    let report = h.service.process_now(Some(id)).await.unwrap();
    assert!(report.success());
    assert_eq!(report.processed, 0);

    let campaign = h.campaign(id).await;
    assert_eq!(campaign.status, CampaignStatus::Sent);
    assert_eq!(campaign.counters.total_sent, 0);
}

#[tokio::test]
async fn test_sweep_requeues_stranded_records() {
    let h = Harness::new(config());
    let ids = h.subscribers(1).await;
    let id = h.ready_campaign().await;
    h.service.enqueue(id).await.unwrap();

    let mut record = h.store.record(RecordKey::new(id, ids[0])).await.unwrap().unwrap();
    record.mark_sending(h.now());
    h.store.update_record(&record).await.unwrap();

    assert_eq!(h.service.sweep().await.unwrap().unwrap().requeued, 0);

    h.clock.advance(TimeDelta::minutes(16));
    assert_eq!(h.service.sweep().await.unwrap().unwrap().requeued, 1);

    let record: DeliveryRecord = h.store.record(RecordKey::new(id, ids[0])).await.unwrap().unwrap();
    assert_eq!(record.status, RecordStatus::Pending);
}

#[tokio::test]
async fn test_tracking_and_reactivation() {
    let h = Harness::new(config());
    let ids = h.subscribers(1).await;
    let id = h.ready_campaign().await;

    h.service.track_open(id).await.unwrap();
    h.service.track_open(id).await.unwrap();
    h.service.track_click(id).await.unwrap();
    assert!(h.service.unsubscribe(ids[0], Some(id)).await.unwrap());

    let campaign = h.campaign(id).await;
    assert_eq!(campaign.counters.total_opened, 2);
    assert_eq!(campaign.counters.total_clicked, 1);
    assert_eq!(campaign.counters.total_unsubscribed, 1);

    // Nothing automatic brings them back...
    assert!(
        !h.store
            .mark_subscriber(ids[0], SubscriberStatus::Active)
            .await
            .unwrap()
    );
    // ...only a manual reactivation.
    assert!(h.service.reactivate(ids[0]).await.unwrap());
    let subscriber = h.store.subscriber(ids[0]).await.unwrap().unwrap();
    assert_eq!(subscriber.status, SubscriberStatus::Active);

    let err = h
        .service
        .reactivate(herald_common::SubscriberId::generate())
        .await
        .unwrap_err();
    assert!(matches!(err, DispatchError::SubscriberNotFound(_)));
}
