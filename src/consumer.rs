#![forbid(unsafe_code)]

use crate::cache::{ReplyCache, ReplyEntry};
use crate::codec::PayloadCodec;
use crate::config::{ChannelConfig, RouteConfig, SerializerKind, StartupConfig, SubjectConfig};
use crate::error::{Error, Result};
use crate::schema::SchemaRegistry;
use crate::transport::broker::{BrokerRecord, RecordConsumer, CORRELATION_HEADER};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Consumer worker health. Transitions are one-directional except
/// starting to running; a failed worker never recovers in-process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStatus {
    Starting,
    Running,
    Failed,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerStatus::Starting => "STARTING",
            WorkerStatus::Running => "RUNNING",
            WorkerStatus::Failed => "FAILED",
        }
    }
}

/// Response topics deduplicated across the route table. Two routes naming one
/// topic must agree on serializer and subject; a mismatch is a configuration
/// error caught before any worker starts.
#[derive(Debug)]
pub struct ConsumerPlan {
    pub topics: Vec<PlannedTopic>,
}

#[derive(Debug)]
pub struct PlannedTopic {
    pub topic: String,
    pub serializer: SerializerKind,
    pub subject: Option<SubjectConfig>,
    pub channel: ChannelConfig,
    /// Route names sharing this response topic.
    pub routes: Vec<String>,
}

impl ConsumerPlan {
    pub fn from_routes(routes: &[RouteConfig]) -> Result<Self> {
        let mut planned: Vec<PlannedTopic> = Vec::new();
        let mut by_topic: HashMap<String, usize> = HashMap::new();

        for route in routes {
            let Some(response) = &route.response else {
                continue;
            };

            match by_topic.get(&response.topic) {
                Some(&index) => {
                    let existing = &mut planned[index];
                    if existing.serializer != response.serializer {
                        return Err(Error::ConsumerPlanConflict {
                            topic: response.topic.clone(),
                            field: "serializers",
                            left: existing.serializer.as_str().to_string(),
                            right: response.serializer.as_str().to_string(),
                        });
                    }
                    let existing_subject = existing.subject.as_ref().map(|s| s.name.as_str());
                    let route_subject = route.subject.as_ref().map(|s| s.name.as_str());
                    if existing_subject != route_subject {
                        return Err(Error::ConsumerPlanConflict {
                            topic: response.topic.clone(),
                            field: "subjects",
                            left: existing_subject.unwrap_or("<none>").to_string(),
                            right: route_subject.unwrap_or("<none>").to_string(),
                        });
                    }
                    existing.routes.push(route.name.clone());
                }
                None => {
                    by_topic.insert(response.topic.clone(), planned.len());
                    planned.push(PlannedTopic {
                        topic: response.topic.clone(),
                        serializer: response.serializer,
                        subject: route.subject.clone(),
                        channel: response.clone(),
                        routes: vec![route.name.clone()],
                    });
                }
            }
        }

        Ok(Self { topics: planned })
    }
}

/// Supervises one background worker per planned response topic, funneling
/// decoded replies into the correlation cache.
pub struct ConsumerGroup {
    workers: Vec<WorkerHandle>,
}

struct WorkerHandle {
    topic: String,
    status: watch::Receiver<WorkerStatus>,
    task: JoinHandle<()>,
}

impl ConsumerGroup {
    /// Start one worker per planned topic. Schema resolution and topic
    /// subscription failures here are fatal to startup.
    pub async fn bootstrap_with<C, F>(
        plan: ConsumerPlan,
        registry: &SchemaRegistry,
        cache: Arc<ReplyCache>,
        shutdown: CancellationToken,
        mut factory: F,
    ) -> Result<Self>
    where
        C: RecordConsumer,
        F: FnMut(&PlannedTopic) -> Result<C>,
    {
        let mut workers = Vec::with_capacity(plan.topics.len());

        for planned in &plan.topics {
            info!(
                topic = %planned.topic,
                routes = %planned.routes.join(","),
                "creating consumer worker"
            );

            let resolved = match &planned.subject {
                Some(subject) => Some(registry.resolve(&subject.name, subject.version).await?),
                None => None,
            };
            let codec = PayloadCodec::for_channel(planned.serializer, resolved.as_ref())?;

            let consumer = factory(planned)?;
            let (status_tx, status_rx) = watch::channel(WorkerStatus::Starting);

            let worker = Worker {
                topic: planned.topic.clone(),
                codec,
                cache: Arc::clone(&cache),
                consumer,
                status: status_tx,
            };
            let task = tokio::spawn(worker.run(shutdown.clone()));

            workers.push(WorkerHandle {
                topic: planned.topic.clone(),
                status: status_rx,
                task,
            });
        }

        Ok(Self { workers })
    }

    /// Readiness barrier: poll worker status until all report running or the
    /// startup timeout elapses. A worker already failed fails fast.
    pub async fn wait_ready(&self, startup: &StartupConfig) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(startup.timeout_ms);
        let interval = Duration::from_millis(startup.check_interval_ms);

        info!(
            workers = self.workers.len(),
            timeout_ms = startup.timeout_ms,
            "waiting for consumer workers to be ready"
        );

        loop {
            let statuses = self.statuses();
            let running = statuses
                .iter()
                .filter(|(_, status)| *status == WorkerStatus::Running)
                .count();

            if let Some((topic, _)) = statuses
                .iter()
                .find(|(_, status)| *status == WorkerStatus::Failed)
            {
                return Err(Error::ConsumerStartup {
                    reason: format!("worker for topic `{topic}` failed during startup"),
                });
            }

            info!(
                running = running,
                total = statuses.len(),
                "consumer workers reporting ready"
            );

            if running == statuses.len() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::ConsumerReadiness {
                    timeout_ms: startup.timeout_ms,
                    running,
                    total: statuses.len(),
                });
            }

            sleep(interval).await;
        }
    }

    /// Per-topic worker status, for the readiness barrier and the health
    /// endpoint.
    pub fn statuses(&self) -> Vec<(String, WorkerStatus)> {
        self.workers
            .iter()
            .map(|worker| (worker.topic.clone(), *worker.status.borrow()))
            .collect()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub async fn join(self) {
        for worker in self.workers {
            let _ = worker.task.await;
        }
    }
}

struct Worker<C> {
    topic: String,
    codec: PayloadCodec,
    cache: Arc<ReplyCache>,
    consumer: C,
    status: watch::Sender<WorkerStatus>,
}

impl<C: RecordConsumer> Worker<C> {
    async fn run(mut self, shutdown: CancellationToken) {
        if let Err(err) = self.consumer.subscribe(&self.topic).await {
            error!(topic = %self.topic, error = %err, "worker failed to subscribe");
            let _ = self.status.send(WorkerStatus::Failed);
            return;
        }

        let _ = self.status.send(WorkerStatus::Running);
        info!(topic = %self.topic, "consumer worker running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(topic = %self.topic, "consumer worker shutting down");
                    return;
                }
                polled = self.consumer.poll() => {
                    match polled {
                        Ok(Some(record)) => self.handle_record(record),
                        Ok(None) => {}
                        Err(err) => {
                            error!(topic = %self.topic, error = %err, "consumer poll failed");
                            let _ = self.status.send(WorkerStatus::Failed);
                            return;
                        }
                    }
                }
            }
        }
    }

    fn handle_record(&self, record: BrokerRecord) {
        let Some(key) = correlation_key(&record) else {
            warn!(topic = %self.topic, "record without correlation key, dropping");
            return;
        };

        let Some(payload) = record.payload.as_deref() else {
            warn!(topic = %self.topic, key = %key, "record without payload, dropping");
            return;
        };

        let decoded = match self.codec.decode(&self.topic, payload) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    topic = %self.topic,
                    key = %key,
                    error = %err,
                    "failed to decode reply, dropping"
                );
                return;
            }
        };

        info!(topic = %self.topic, key = %key, "reply received");
        self.cache.put(ReplyEntry::new(key, decoded));
    }
}

/// The `causeway-key` header overrides the record key when present; an
/// external worker may have rewritten the key while relaying the request.
fn correlation_key(record: &BrokerRecord) -> Option<String> {
    if let Some(value) = record.header(CORRELATION_HEADER) {
        if let Ok(text) = std::str::from_utf8(value) {
            return Some(text.to_string());
        }
    }

    record
        .key
        .as_deref()
        .and_then(|key| std::str::from_utf8(key).ok())
        .map(|key| key.to_string())
}
