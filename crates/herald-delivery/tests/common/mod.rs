//! Shared wiring for delivery integration tests: in-memory storage, a frozen
//! clock and a wiremock receiver.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use herald_core::{
    models::{OrganizationId, OutboxEvent, SigningSecret, WebhookConfig, WebhookRetryPolicy},
    Clock, TestClock,
};
use herald_delivery::{
    storage::mock::MockStorage, BackoffPolicy, BatchScheduler, ClientConfig, DeliveryExecutor,
    EventProcessor, SchedulerConfig,
};
use sqlx::types::Json;
use wiremock::MockServer;

pub const SECRET: &str = "whsec_test_secret";
pub const TOPIC: &str = "appointments";
pub const SMART_CODE: &str = "HERA.SALON.APPOINTMENT.CREATED.v1";

pub struct Harness {
    pub storage: MockStorage,
    pub clock: TestClock,
    pub server: MockServer,
    pub org: OrganizationId,
}

impl Harness {
    pub async fn new() -> Self {
        Self {
            storage: MockStorage::new(),
            clock: TestClock::new(),
            server: MockServer::start().await,
            org: OrganizationId::new(),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig { timeout: Duration::from_secs(2), ..ClientConfig::default() }
    }

    pub fn executor_with(&self, config: ClientConfig) -> Arc<DeliveryExecutor> {
        Arc::new(
            DeliveryExecutor::new(config, Arc::new(self.storage.clone()), Arc::new(self.clock.clone()))
                .unwrap(),
        )
    }

    pub fn executor(&self) -> Arc<DeliveryExecutor> {
        self.executor_with(self.client_config())
    }

    pub fn processor(&self) -> Arc<EventProcessor> {
        Arc::new(EventProcessor::new(
            Arc::new(self.storage.clone()),
            self.executor(),
            BackoffPolicy::default(),
            Arc::new(self.clock.clone()),
        ))
    }

    pub fn scheduler(&self, config: SchedulerConfig) -> Arc<BatchScheduler> {
        Arc::new(
            BatchScheduler::new(
                Arc::new(self.storage.clone()),
                self.processor(),
                Arc::new(self.clock.clone()),
                config,
            )
            .unwrap(),
        )
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.server.uri())
    }

    /// Inserts an active webhook on [`TOPIC`] pointing at `path`.
    pub async fn webhook(&self, path: &str) -> WebhookConfig {
        let webhook = WebhookConfig::new(
            self.org,
            self.url(path),
            SigningSecret::new(SECRET),
            vec![TOPIC.to_string()],
            self.clock.now_utc(),
        );
        self.storage.insert_webhook(webhook.clone()).await;
        webhook
    }

    pub async fn webhook_with_policy(&self, path: &str, policy: WebhookRetryPolicy) -> WebhookConfig {
        let mut webhook = WebhookConfig::new(
            self.org,
            self.url(path),
            SigningSecret::new(SECRET),
            vec![TOPIC.to_string()],
            self.clock.now_utc(),
        );
        webhook.retry_policy = Some(Json(policy));
        self.storage.insert_webhook(webhook.clone()).await;
        webhook
    }

    /// Inserts a pending, due event on `topic`.
    pub async fn event_on(&self, topic: &str) -> OutboxEvent {
        let event = OutboxEvent::new(
            self.org,
            topic,
            SMART_CODE,
            serde_json::json!({"appointment_id": "apt-1", "customer": "c-9"}),
            self.clock.now_utc(),
        );
        self.storage.insert_event(event.clone()).await;
        event
    }

    pub async fn event(&self) -> OutboxEvent {
        self.event_on(TOPIC).await
    }

    pub async fn stored(&self, event: &OutboxEvent) -> OutboxEvent {
        self.storage.event(event.id).await.unwrap()
    }
}
