//! Shared fixtures for the dispatch integration tests
#![allow(dead_code)]

pub mod mock_relay;
pub mod transport;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use herald_common::{
    Campaign, CampaignId, CampaignStatus, Clock, ManualClock, Subscriber, SubscriberId,
};
use herald_delivery::{
    DispatchConfig, DispatchService, RateLimitConfig, RetryPolicy, ServiceConfig,
};
use herald_store::{MemoryStore, Store};

pub use self::transport::ScriptedTransport;

pub struct Harness {
    pub store: Arc<dyn Store>,
    pub clock: Arc<ManualClock>,
    pub transport: Arc<ScriptedTransport>,
    pub service: DispatchService,
}

impl Harness {
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), config)
    }

    pub fn with_store(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        Self::build(store, clock, ScriptedTransport::new(), config)
    }

    pub fn build(
        store: Arc<dyn Store>,
        clock: Arc<ManualClock>,
        transport: ScriptedTransport,
        config: ServiceConfig,
    ) -> Self {
        let transport = Arc::new(transport);
        let service = DispatchService::new(store.clone(), transport.clone(), clock.clone(), config);
        Self {
            store,
            clock,
            transport,
            service,
        }
    }

    pub fn now(&self) -> chrono::DateTime<Utc> {
        self.clock.now()
    }

    /// `count` active subscribers named `user{i}@example.com`
    pub async fn subscribers(&self, count: usize) -> Vec<SubscriberId> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let subscriber = Subscriber::new(email(i), format!("User {i}"));
            ids.push(subscriber.id);
            self.store
                .upsert_subscriber(subscriber)
                .await
                .unwrap_or_else(|e| panic!("{e}"));
        }
        ids
    }

    pub async fn ready_campaign(&self) -> CampaignId {
        let campaign = Campaign::new("Monthly digest", "<p>news</p>", self.now())
            .with_status(CampaignStatus::Ready);
        let id = campaign.id;
        self.store
            .insert_campaign(campaign)
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        id
    }

    pub async fn campaign(&self, id: CampaignId) -> Campaign {
        self.store
            .campaign(id)
            .await
            .unwrap_or_else(|e| panic!("{e}"))
            .unwrap_or_else(|| panic!("campaign {id} missing"))
    }
}

pub fn email(i: usize) -> String {
    format!("user{i}@example.com")
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Generous limits so only the knob under test matters
pub fn config() -> ServiceConfig {
    ServiceConfig {
        dispatch: DispatchConfig::default(),
        retry: RetryPolicy::default(),
        rate_limit: RateLimitConfig {
            messages_per_second: 1000.0,
            burst_size: 10_000,
            persist: true,
        },
    }
}
