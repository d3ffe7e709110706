use std::sync::Arc;

use herald_common::{SystemClock, audit, internal};
use herald_control::{Command, CommandHandler, DispatchHandler, Request, ResponseData};
use herald_delivery::DispatchService;

use crate::config::HeraldConfig;

/// A configured herald instance: store, transport and service wired together
pub struct Herald {
    handler: DispatchHandler,
}

impl Herald {
    /// Open the store and build the dispatch service.
    ///
    /// # Errors
    /// Returns an error if the store cannot be opened.
    pub async fn from_config(config: HeraldConfig) -> anyhow::Result<Self> {
        audit::init(config.audit.clone());

        let service_config = config.service();
        let transport = config.transport.build();
        let store = config.store.open().await?;

        internal!("Store opened, transport: {:?}", transport);

        let service = DispatchService::new(store, transport, Arc::new(SystemClock), service_config);

        Ok(Self {
            handler: DispatchHandler::new(Arc::new(service), Arc::new(SystemClock)),
        })
    }

    /// Run one command, passing any response data to `on_data`.
    ///
    /// An aborted dispatch tick still has its report passed on before the
    /// error is returned.
    ///
    /// # Errors
    /// Returns an error if the command failed or the tick was aborted.
    pub async fn execute(
        &self,
        command: Command,
        on_data: impl FnOnce(&ResponseData),
    ) -> anyhow::Result<()> {
        let data = self.handler.handle(Request::new(command)).await.into_data()?;

        if let Some(data) = data {
            on_data(&data);
            if data.tick_failed() {
                anyhow::bail!("Dispatch tick failed");
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use herald_common::CampaignStatus;

    use super::*;

    async fn memory_herald() -> Herald {
        let config =
            HeraldConfig::parse("Herald (store: Memory(capacity: None), transport: Log)").unwrap();
        Herald::from_config(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_dry_run_campaign() {
        let herald = memory_herald().await;

        for email in ["a@example.com", "b@example.com"] {
            herald
                .execute(
                    Command::AddSubscriber {
                        email: email.to_string(),
                        name: String::new(),
                        tags: Vec::new(),
                    },
                    |_| {},
                )
                .await
                .unwrap();
        }
        herald
            .execute(
                Command::AddCampaign {
                    title: "Hello".to_string(),
                    content: "<p>hello</p>".to_string(),
                    ready: true,
                    scheduled_at: None,
                },
                |_| {},
            )
            .await
            .unwrap();

        let mut report = None;
        herald
            .execute(Command::Tick, |data| report = Some(data.clone()))
            .await
            .unwrap();

        let Some(ResponseData::Tick(scheduled)) = report else {
            panic!("expected a tick report");
        };
        assert_eq!(scheduled.tick.delivered, 2);
        assert_eq!(scheduled.tick.finished_campaigns.len(), 1);
        assert_eq!(scheduled.tick.finished_campaigns[0].1, CampaignStatus::Sent);
    }

    #[tokio::test]
    async fn test_errors_surface() {
        let herald = memory_herald().await;

        let err = herald
            .execute(
                Command::Pause {
                    campaign_id: herald_common::CampaignId::generate(),
                },
                |_| {},
            )
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Server error: Campaign not found"));
    }

    #[tokio::test]
    async fn test_opens_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let config = HeraldConfig::parse(&format!(
            "Herald (store: File(path: {:?}))",
            dir.path().display().to_string()
        ))
        .unwrap();

        let herald = Herald::from_config(config).await.unwrap();
        herald.execute(Command::Sweep, |_| {}).await.unwrap();
    }
}
