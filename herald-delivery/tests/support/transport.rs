//! In-process transport with scripted outcomes
#![allow(dead_code)]

use std::{collections::VecDeque, sync::Arc, time::Duration};

use ahash::AHashMap;
use async_trait::async_trait;
use chrono::{TimeDelta, Utc};
use herald_common::{CampaignId, CampaignStatus, ManualClock};
use herald_delivery::{OutboundMessage, SendOutcome, Transport};
use herald_store::Store;
use parking_lot::Mutex;

/// Pause `campaign` once this many sends have completed
struct PauseAfter {
    sends: usize,
    store: Arc<dyn Store>,
    campaign: CampaignId,
}

#[derive(Default)]
struct Script {
    /// Outcomes queued per recipient address, consumed in order
    by_recipient: AHashMap<String, VecDeque<SendOutcome>>,
    sent: Vec<OutboundMessage>,
}

#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<Script>,
    delay: Option<Duration>,
    clock_step: Option<(Arc<ManualClock>, TimeDelta)>,
    pause_after: Mutex<Option<PauseAfter>>,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedTransport")
            .field("sent", &self.script.lock().sent.len())
            .finish_non_exhaustive()
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for one recipient; once exhausted it is delivered.
    pub fn script(&self, email: &str, outcomes: impl IntoIterator<Item = SendOutcome>) {
        self.script
            .lock()
            .by_recipient
            .entry(email.to_string())
            .or_default()
            .extend(outcomes);
    }

    /// Real-time delay on every send
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Advance `clock` by `step` on every send
    #[must_use]
    pub fn with_clock_step(mut self, clock: Arc<ManualClock>, step: TimeDelta) -> Self {
        self.clock_step = Some((clock, step));
        self
    }

    pub fn pause_after(&self, sends: usize, store: Arc<dyn Store>, campaign: CampaignId) {
        *self.pause_after.lock() = Some(PauseAfter {
            sends,
            store,
            campaign,
        });
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.script.lock().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.script.lock().sent.len()
    }

    pub fn sent_to(&self, email: &str) -> usize {
        self.script
            .lock()
            .sent
            .iter()
            .filter(|message| message.to_email == email)
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, message: &OutboundMessage) -> SendOutcome {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((clock, step)) = &self.clock_step {
            clock.advance(*step);
        }

        let (outcome, sends) = {
            let mut script = self.script.lock();
            script.sent.push(message.clone());
            let outcome = script
                .by_recipient
                .get_mut(&message.to_email)
                .and_then(VecDeque::pop_front)
                .unwrap_or(SendOutcome::Delivered);
            (outcome, script.sent.len())
        };

        let pause = {
            let mut pause_after = self.pause_after.lock();
            if pause_after.as_ref().is_some_and(|p| p.sends == sends) {
                pause_after.take()
            } else {
                None
            }
        };
        if let Some(pause) = pause {
            pause
                .store
                .transition_campaign(
                    pause.campaign,
                    CampaignStatus::Sending,
                    CampaignStatus::Paused,
                    Utc::now(),
                )
                .await
                .unwrap_or_else(|e| panic!("pause failed: {e}"));
        }

        outcome
    }
}
