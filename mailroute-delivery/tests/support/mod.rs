//! Test doubles shared by the integration tests
#![allow(dead_code)] // Not every test binary uses every helper

pub mod mock_server;

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use mailroute_common::{Domain, EmailJob};
use mailroute_delivery::{
    ChannelConfig, DeliveryConfig, DnsError, JobPipeline, JobSource, LogPublisher,
    MailExchanger, MemoryMxStore, MxCache, MxLookup, PublishError, QueueError, Reporter,
    SmtpDelivery, SmtpTimeouts,
};
use serde_json::Value;
use tokio::sync::Semaphore;

/// Records every published entry instead of sending it anywhere.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<(String, Value)>>,
}

impl RecordingPublisher {
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.published.lock().unwrap().clone()
    }

    pub fn on_channel(&self, channel: &str) -> Vec<Value> {
        self.entries()
            .into_iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, entry)| entry)
            .collect()
    }
}

#[async_trait]
impl LogPublisher for RecordingPublisher {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), PublishError> {
        let entry = serde_json::from_str(&payload)?;
        self.published
            .lock()
            .unwrap()
            .push((channel.to_string(), entry));
        Ok(())
    }
}

/// Answers MX lookups from a fixed table and counts them per domain.
///
/// Domains missing from the table fail with a timeout. When a gate is set,
/// every lookup waits for a permit first.
#[derive(Debug, Default)]
pub struct ScriptedLookup {
    answers: HashMap<String, Vec<MailExchanger>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    panics_on: Option<String>,
}

impl ScriptedLookup {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn answer(mut self, domain: &str, exchangers: Vec<MailExchanger>) -> Self {
        self.answers.insert(domain.to_string(), exchangers);
        self
    }

    #[must_use]
    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Lookups for `domain` panic instead of answering.
    #[must_use]
    pub fn panicking(mut self, domain: &str) -> Self {
        self.panics_on = Some(domain.to_string());
        self
    }

    pub fn calls_for(&self, domain: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(domain)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MxLookup for ScriptedLookup {
    async fn lookup_mx(&self, domain: &Domain) -> Result<Vec<MailExchanger>, DnsError> {
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }

        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(domain.to_string())
            .or_default() += 1;

        assert!(
            self.panics_on.as_deref() != Some(domain.as_str()),
            "scripted lookup failure for {domain}"
        );

        self.answers
            .get(domain.as_str())
            .cloned()
            .ok_or_else(|| DnsError::Timeout(domain.to_string()))
    }
}

/// Hands out fixed payloads, then reports the queue closed.
#[derive(Debug, Default)]
pub struct VecJobSource {
    payloads: Mutex<VecDeque<Result<String, QueueError>>>,
}

impl VecJobSource {
    pub fn new(payloads: impl IntoIterator<Item = String>) -> Self {
        Self {
            payloads: Mutex::new(payloads.into_iter().map(Ok).collect()),
        }
    }

    /// Inserts a fetch failure before the remaining payloads.
    pub fn fail_next(&self, error: QueueError) {
        self.payloads.lock().unwrap().push_front(Err(error));
    }
}

#[async_trait]
impl JobSource for VecJobSource {
    async fn pop(&self) -> Result<Option<String>, QueueError> {
        let next = self.payloads.lock().unwrap().pop_front();
        next.map_or(Err(QueueError::Closed), |payload| payload.map(Some))
    }
}

/// A source whose every pop waits out its timeout and comes back empty.
#[derive(Debug, Default)]
pub struct IdleJobSource {
    polls: AtomicUsize,
}

impl IdleJobSource {
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobSource for IdleJobSource {
    async fn pop(&self) -> Result<Option<String>, QueueError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }
}

/// A source that takes `delay` to hand over its single payload, then closes.
#[derive(Debug)]
pub struct SlowJobSource {
    payload: Mutex<Option<String>>,
    delay: Duration,
}

impl SlowJobSource {
    pub fn new(payload: String, delay: Duration) -> Self {
        Self {
            payload: Mutex::new(Some(payload)),
            delay,
        }
    }
}

#[async_trait]
impl JobSource for SlowJobSource {
    async fn pop(&self) -> Result<Option<String>, QueueError> {
        let Some(payload) = self.payload.lock().unwrap().take() else {
            return Err(QueueError::Closed);
        };
        tokio::time::sleep(self.delay).await;
        Ok(Some(payload))
    }
}

pub fn job(from: &str, to: &[&str]) -> EmailJob {
    EmailJob {
        from: from.to_string(),
        to: to.iter().map(ToString::to_string).collect(),
        subject: "Test subject".to_string(),
        body: "Hello from the test suite\r\n.leading dot".to_string(),
    }
}

/// Delivery settings aimed at a local mock server.
pub fn delivery_config(port: u16) -> DeliveryConfig {
    DeliveryConfig {
        port,
        helo_name: "mailroute.test".to_string(),
        smtp_timeouts: SmtpTimeouts::uniform(2),
        ..Default::default()
    }
}

/// Everything a pipeline test needs to inspect afterwards.
pub struct Harness {
    pub pipeline: JobPipeline,
    pub lookup: Arc<ScriptedLookup>,
    pub store: Arc<MemoryMxStore>,
    pub publisher: Arc<RecordingPublisher>,
}

pub fn harness(lookup: ScriptedLookup, config: DeliveryConfig) -> Harness {
    let lookup = Arc::new(lookup);
    let store = Arc::new(MemoryMxStore::default());
    let publisher = Arc::new(RecordingPublisher::default());

    let pipeline = JobPipeline::new(
        MxCache::new(store.clone(), lookup.clone()),
        SmtpDelivery::new(config),
        Reporter::new(publisher.clone(), ChannelConfig::default()),
    );

    Harness {
        pipeline,
        lookup,
        store,
        publisher,
    }
}

pub const MAIL_LOGS: &str = "::channel_for_mail:logs";
pub const DELIVERY_LOGS: &str = "::email:logs";
