//! Alert Forwarder - HTTP Alert Delivery
//!
//! Delivers fired alerts to external collaborators without blocking the
//! scoring path: callers `try_send` into a bounded channel and a background
//! task posts each alert to every configured sink with bounded retry.
//!
//! Sinks:
//! - notification webhook: every alert
//! - analysis webhook: only alerts flagged `auto_analyze`
//!
//! Delivery failures are logged and counted. They never touch the alert log.

use crate::alert::AlertRecord;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const ALERT_SCHEMA_VERSION: u16 = 1;

/// Wire envelope posted to every sink
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEnvelope<'a> {
    pub schema_version: u16,
    pub source: &'static str,
    pub alert: &'a AlertRecord,
}

impl<'a> AlertEnvelope<'a> {
    pub fn new(alert: &'a AlertRecord) -> Self {
        Self {
            schema_version: ALERT_SCHEMA_VERSION,
            source: "pulse",
            alert,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("rate limited ({0})")]
    RateLimited(StatusCode),
    #[error("sink returned {0}")]
    Status(StatusCode),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Receives every fired alert
    pub webhook_url: Option<String>,
    /// Receives only alerts flagged for automated analysis
    pub analysis_url: Option<String>,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub channel_capacity: usize,
    pub timeout_ms: u64,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            analysis_url: None,
            max_retries: 3,
            retry_base_delay_ms: 100,
            channel_capacity: 1024,
            timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Default)]
pub struct ForwarderStats {
    pub sent: AtomicU64,
    pub failed: AtomicU64,
    pub retried: AtomicU64,
    pub dropped: AtomicU64,
}

/// Destination for fired alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this sink wants `alert` at all
    fn accepts(&self, _alert: &AlertRecord) -> bool {
        true
    }

    async fn deliver(&self, alert: &AlertRecord) -> Result<(), DeliveryError>;
}

/// Posts the JSON envelope to a fixed URL
pub struct WebhookSink {
    name: String,
    url: String,
    client: reqwest::Client,
    auto_analyze_only: bool,
}

impl WebhookSink {
    pub fn new(name: impl Into<String>, url: impl Into<String>, client: reqwest::Client) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            client,
            auto_analyze_only: false,
        }
    }

    pub fn auto_analyze_only(mut self) -> Self {
        self.auto_analyze_only = true;
        self
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, alert: &AlertRecord) -> bool {
        !self.auto_analyze_only || alert.auto_analyze
    }

    async fn deliver(&self, alert: &AlertRecord) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .json(&AlertEnvelope::new(alert))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::TOO_MANY_REQUESTS {
            Err(DeliveryError::RateLimited(status))
        } else {
            Err(DeliveryError::Status(status))
        }
    }
}

pub struct AlertForwarder {
    tx: mpsc::Sender<AlertRecord>,
    stats: Arc<ForwarderStats>,
    worker: JoinHandle<()>,
}

impl AlertForwarder {
    /// Forwarder with webhook sinks built from `config`. Must be called
    /// inside a tokio runtime.
    pub fn new(config: ForwarderConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .pool_max_idle_per_host(4)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        let mut sinks: Vec<Box<dyn AlertSink>> = Vec::new();
        if let Some(url) = &config.webhook_url {
            sinks.push(Box::new(WebhookSink::new("webhook", url, client.clone())));
        }
        if let Some(url) = &config.analysis_url {
            sinks.push(Box::new(
                WebhookSink::new("analysis", url, client.clone()).auto_analyze_only(),
            ));
        }

        Self::with_sinks(config, sinks)
    }

    pub fn with_sinks(config: ForwarderConfig, sinks: Vec<Box<dyn AlertSink>>) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let stats = Arc::new(ForwarderStats::default());
        let stats_clone = stats.clone();

        let worker = tokio::spawn(async move {
            Self::worker(rx, sinks, config, stats_clone).await;
        });

        Self { tx, stats, worker }
    }

    pub fn stats(&self) -> &ForwarderStats {
        &self.stats
    }

    /// Queue an alert without waiting. Hands the alert back when the queue
    /// is full or the worker is gone.
    pub fn try_send(&self, alert: AlertRecord) -> Result<(), AlertRecord> {
        match self.tx.try_send(alert) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(alert))
            | Err(mpsc::error::TrySendError::Closed(alert)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(alert)
            }
        }
    }

    /// Close the queue and wait for queued alerts to be delivered.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            error!(error = %e, "Alert forwarder task failed");
        }
    }

    async fn worker(
        mut rx: mpsc::Receiver<AlertRecord>,
        sinks: Vec<Box<dyn AlertSink>>,
        config: ForwarderConfig,
        stats: Arc<ForwarderStats>,
    ) {
        info!(sinks = sinks.len(), "Alert forwarder started");

        while let Some(alert) = rx.recv().await {
            for sink in sinks.iter().filter(|s| s.accepts(&alert)) {
                Self::deliver_with_retry(sink.as_ref(), &alert, &config, &stats).await;
            }
        }

        info!("Alert forwarder stopped");
    }

    async fn deliver_with_retry(
        sink: &dyn AlertSink,
        alert: &AlertRecord,
        config: &ForwarderConfig,
        stats: &ForwarderStats,
    ) {
        for attempt in 0..=config.max_retries {
            match sink.deliver(alert).await {
                Ok(()) => {
                    stats.sent.fetch_add(1, Ordering::Relaxed);
                    debug!(sink = sink.name(), alert = %alert.id, "Alert delivered");
                    return;
                }
                Err(e) => {
                    warn!(attempt, sink = sink.name(), error = %e, "Alert delivery failed");
                }
            }

            if attempt < config.max_retries {
                stats.retried.fetch_add(1, Ordering::Relaxed);
                let delay = config.retry_base_delay_ms.saturating_mul(1 << attempt.min(16));
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }

        stats.failed.fetch_add(1, Ordering::Relaxed);
        error!(
            sink = sink.name(),
            alert = %alert.id,
            session = %alert.session_id,
            "Dropped alert after max retries"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertEngine;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    struct RecordingSink {
        seen: Arc<Mutex<Vec<u8>>>,
        analyze_only: bool,
    }

    #[async_trait]
    impl AlertSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        fn accepts(&self, alert: &AlertRecord) -> bool {
            !self.analyze_only || alert.auto_analyze
        }

        async fn deliver(&self, alert: &AlertRecord) -> Result<(), DeliveryError> {
            self.seen.lock().unwrap().push(alert.score);
            Ok(())
        }
    }

    struct FlakySink {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl AlertSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, _alert: &AlertRecord) -> Result<(), DeliveryError> {
            if self.failures_left.load(Ordering::Relaxed) > 0 {
                self.failures_left.fetch_sub(1, Ordering::Relaxed);
                Err(DeliveryError::Status(StatusCode::BAD_GATEWAY))
            } else {
                Ok(())
            }
        }
    }

    fn alerts() -> Vec<AlertRecord> {
        let mut engine = AlertEngine::default();
        let mut fired = Vec::new();
        for score in [55, 55, 55, 75, 90] {
            if let Some(alert) = engine.evaluate(score, &[], "svc", Utc::now()) {
                fired.push(alert);
            }
        }
        fired
    }

    fn fast_config() -> ForwarderConfig {
        ForwarderConfig {
            retry_base_delay_ms: 1,
            ..ForwarderConfig::default()
        }
    }

    #[test]
    fn test_envelope_shape() {
        let alert = alerts().remove(0);
        let json = serde_json::to_value(AlertEnvelope::new(&alert)).unwrap();

        assert_eq!(json["schemaVersion"], 1);
        assert_eq!(json["source"], "pulse");
        assert_eq!(json["alert"]["severity"], "WARNING");
        assert_eq!(json["alert"]["sessionId"], "svc");
        assert_eq!(json["alert"]["autoAnalyze"], false);
        assert!(json["alert"]["id"].is_string());
        assert!(json["alert"]["recommendedAction"].is_string());
    }

    #[tokio::test]
    async fn test_routes_by_auto_analyze() {
        let all = Arc::new(Mutex::new(Vec::new()));
        let analysis = Arc::new(Mutex::new(Vec::new()));
        let forwarder = AlertForwarder::with_sinks(
            fast_config(),
            vec![
                Box::new(RecordingSink {
                    seen: all.clone(),
                    analyze_only: false,
                }),
                Box::new(RecordingSink {
                    seen: analysis.clone(),
                    analyze_only: true,
                }),
            ],
        );

        for alert in alerts() {
            forwarder.try_send(alert).unwrap();
        }
        forwarder.shutdown().await;

        assert_eq!(*all.lock().unwrap(), vec![55, 75, 90]);
        assert_eq!(*analysis.lock().unwrap(), vec![75, 90]);
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let forwarder = AlertForwarder::with_sinks(
            fast_config(),
            vec![Box::new(FlakySink {
                failures_left: AtomicU32::new(2),
            })],
        );
        let stats = forwarder.stats.clone();

        forwarder.try_send(alerts().remove(0)).unwrap();
        forwarder.shutdown().await;

        assert_eq!(stats.sent.load(Ordering::Relaxed), 1);
        assert_eq!(stats.retried.load(Ordering::Relaxed), 2);
        assert_eq!(stats.failed.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let forwarder = AlertForwarder::with_sinks(
            ForwarderConfig {
                max_retries: 1,
                ..fast_config()
            },
            vec![Box::new(FlakySink {
                failures_left: AtomicU32::new(10),
            })],
        );
        let stats = forwarder.stats.clone();

        forwarder.try_send(alerts().remove(0)).unwrap();
        forwarder.shutdown().await;

        assert_eq!(stats.sent.load(Ordering::Relaxed), 0);
        assert_eq!(stats.failed.load(Ordering::Relaxed), 1);
    }
}
