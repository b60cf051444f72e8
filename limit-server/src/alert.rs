//! Alert dispatch.
//!
//! Producers (aggregator, reconcilers) hand alert text to an
//! [`AlertDispatcher`], which only ever `try_send`s into a bounded queue. A
//! single background task drains the queue into an [`AlertSink`]. A full
//! queue drops the alert, so alerting can never stall the control loops.

use crate::config::AlertConfig;
use crate::error::AlertError;
use crate::server::ControlMetrics;
use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Destination for alert messages.
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Deliver one alert to every receiver.
    async fn send(&self, message: &str) -> Result<(), AlertError>;
}

/// Sends alerts as form posts to the IM, email and phone gateways.
#[derive(Debug, Clone)]
pub struct HttpAlertSink {
    http: reqwest::Client,
    endpoint: String,
    im_receivers: Vec<String>,
    phone_receivers: Vec<String>,
    email_receivers: Vec<String>,
    email_title: String,
}

impl HttpAlertSink {
    /// Build a sink from the alert configuration.
    pub fn new(config: &AlertConfig) -> Result<Self, AlertError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            im_receivers: config.im_receivers.clone(),
            phone_receivers: config.phone_receivers.clone(),
            email_receivers: config.email_receivers.clone(),
            email_title: config.email_title.clone(),
        })
    }

    async fn post(&self, path: &str, form: &[(&str, &str)]) -> Result<(), AlertError> {
        let url = format!("{}/{}", self.endpoint, path);
        let response = self.http.post(&url).form(form).send().await?;
        if !response.status().is_success() {
            return Err(AlertError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl AlertSink for HttpAlertSink {
    async fn send(&self, message: &str) -> Result<(), AlertError> {
        let mut last_error = None;

        for popo in &self.im_receivers {
            let form = [("isNormal", "true"), ("popo", popo.as_str()), ("message", message)];
            if let Err(e) = self.post("popo", &form).await {
                tracing::warn!("IM alert to {} failed: {}", popo, e);
                last_error = Some(e);
            }
        }
        for account in &self.email_receivers {
            let form = [
                ("account", account.as_str()),
                ("title", self.email_title.as_str()),
                ("message", message),
            ];
            if let Err(e) = self.post("email", &form).await {
                tracing::warn!("Email alert to {} failed: {}", account, e);
                last_error = Some(e);
            }
        }
        for phone in &self.phone_receivers {
            let form = [("isNormal", "true"), ("phone", phone.as_str()), ("message", message)];
            if let Err(e) = self.post("phone", &form).await {
                tracing::warn!("Phone alert to {} failed: {}", phone, e);
                last_error = Some(e);
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Writes alerts to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, message: &str) -> Result<(), AlertError> {
        tracing::warn!(alert = %message, "Alert raised");
        Ok(())
    }
}

/// Records alerts in memory (for testing).
#[derive(Debug, Clone, Default)]
pub struct RecordingAlertSink {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingAlertSink {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every alert delivered so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl AlertSink for RecordingAlertSink {
    async fn send(&self, message: &str) -> Result<(), AlertError> {
        let mut messages = self
            .messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        messages.push(message.to_string());
        Ok(())
    }
}

/// Non-blocking handle for raising alerts.
#[derive(Debug, Clone)]
pub struct AlertDispatcher {
    tx: mpsc::Sender<String>,
    metrics: Arc<ControlMetrics>,
}

impl AlertDispatcher {
    /// Create a dispatcher and the receiving end of its queue.
    pub fn channel(capacity: usize, metrics: Arc<ControlMetrics>) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, metrics }, rx)
    }

    /// Queue an alert. Drops it with a warning if the queue is full or closed.
    pub fn raise(&self, message: String) {
        self.metrics.alert_queue_depth.fetch_add(1, Ordering::Relaxed);
        match self.tx.try_send(message) {
            Ok(()) => {
                self.metrics.alerts_raised.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(mpsc::error::TrySendError::Full(message)) => {
                tracing::warn!(alert = %message, "Alert queue full, dropping alert");
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                tracing::warn!(alert = %message, "Alert task gone, dropping alert");
            }
        }
        self.metrics.alert_queue_depth.fetch_sub(1, Ordering::Relaxed);
        self.metrics.alerts_dropped.fetch_add(1, Ordering::Relaxed);
    }
}

/// Spawn the task that drains the alert queue into `sink`.
///
/// The task ends once every [`AlertDispatcher`] has been dropped and the
/// queue is empty.
pub fn spawn_alert_task(
    mut rx: mpsc::Receiver<String>,
    sink: Arc<dyn AlertSink>,
    metrics: Arc<ControlMetrics>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            metrics.alert_queue_depth.fetch_sub(1, Ordering::Relaxed);
            if let Err(e) = sink.send(&message).await {
                metrics.alerts_failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Alert dispatch failed: {}", e);
            }
        }
        tracing::debug!("Alert task stopped");
    })
}
