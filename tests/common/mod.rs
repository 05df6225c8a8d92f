#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use causeway::config::{
    CacheConfig, ChannelConfig, EndpointConfig, ResponseConfig, RouteConfig, SerializerKind,
    StartupConfig, SubjectConfig,
};
use causeway::transport::broker::{
    BrokerError, BrokerHeader, BrokerRecord, RecordConsumer, RecordPublisher,
};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

pub const PERSON_SCHEMA: &str = r#"
{
    "type": "record",
    "name": "Person",
    "fields": [
        {"name": "firstName", "type": "string"},
        {"name": "lastName", "type": "string"}
    ]
}
"#;

/// In-memory stand-in for the broker: topics fan records out to every
/// subscriber and remember what was published for assertions.
#[derive(Default)]
pub struct MemoryBroker {
    topics: Mutex<HashMap<String, TopicState>>,
}

#[derive(Default)]
struct TopicState {
    subscribers: Vec<UnboundedSender<BrokerRecord>>,
    published: Vec<BrokerRecord>,
}

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn publisher(self: &Arc<Self>, topic: &str) -> MemoryPublisher {
        MemoryPublisher {
            broker: Arc::clone(self),
            topic: topic.to_string(),
            fail: false,
        }
    }

    pub fn failing_publisher(self: &Arc<Self>, topic: &str) -> MemoryPublisher {
        MemoryPublisher {
            broker: Arc::clone(self),
            topic: topic.to_string(),
            fail: true,
        }
    }

    pub fn consumer(self: &Arc<Self>) -> MemoryConsumer {
        MemoryConsumer {
            broker: Arc::clone(self),
            receiver: None,
            fail_subscribe: false,
        }
    }

    pub fn broken_consumer(self: &Arc<Self>) -> MemoryConsumer {
        MemoryConsumer {
            broker: Arc::clone(self),
            receiver: None,
            fail_subscribe: true,
        }
    }

    pub fn publish(&self, topic: &str, record: BrokerRecord) {
        let mut topics = self.topics.lock().expect("memory broker lock");
        let state = topics.entry(topic.to_string()).or_default();
        state.published.push(record.clone());
        state
            .subscribers
            .retain(|subscriber| subscriber.send(record.clone()).is_ok());
    }

    pub fn published(&self, topic: &str) -> Vec<BrokerRecord> {
        self.topics
            .lock()
            .expect("memory broker lock")
            .get(topic)
            .map(|state| state.published.clone())
            .unwrap_or_default()
    }

    fn attach(&self, topic: &str) -> UnboundedReceiver<BrokerRecord> {
        let (sender, receiver) = unbounded_channel();
        self.topics
            .lock()
            .expect("memory broker lock")
            .entry(topic.to_string())
            .or_default()
            .subscribers
            .push(sender);
        receiver
    }
}

pub struct MemoryPublisher {
    broker: Arc<MemoryBroker>,
    topic: String,
    fail: bool,
}

#[async_trait]
impl RecordPublisher for MemoryPublisher {
    async fn send(
        &self,
        key: &str,
        payload: &[u8],
        headers: &[BrokerHeader],
    ) -> Result<(), BrokerError> {
        if self.fail {
            return Err(BrokerError::new("broker unavailable"));
        }

        self.broker.publish(
            &self.topic,
            BrokerRecord {
                key: Some(key.as_bytes().to_vec()),
                payload: Some(payload.to_vec()),
                headers: headers.to_vec(),
            },
        );
        Ok(())
    }
}

pub struct MemoryConsumer {
    broker: Arc<MemoryBroker>,
    receiver: Option<UnboundedReceiver<BrokerRecord>>,
    fail_subscribe: bool,
}

#[async_trait]
impl RecordConsumer for MemoryConsumer {
    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        if self.fail_subscribe {
            return Err(BrokerError::new(format!("cannot subscribe to `{topic}`")));
        }
        self.receiver = Some(self.broker.attach(topic));
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<BrokerRecord>, BrokerError> {
        let Some(receiver) = self.receiver.as_mut() else {
            return Err(BrokerError::new("poll before subscribe"));
        };
        match receiver.recv().await {
            Some(record) => Ok(Some(record)),
            // Broker gone; park instead of spinning.
            None => std::future::pending().await,
        }
    }
}

pub fn channel(topic: &str, timeout_ms: u64) -> ChannelConfig {
    ChannelConfig {
        topic: topic.to_string(),
        serializer: SerializerKind::Avro,
        client_id: format!("{topic}-client"),
        group_id: format!("{topic}-group"),
        timeout_ms,
        acks: None,
        properties: BTreeMap::new(),
    }
}

pub fn route(
    name: &str,
    path: &str,
    subject: Option<&str>,
    request_topic: &str,
    response_topic: Option<&str>,
    reply_timeout_ms: u64,
) -> RouteConfig {
    RouteConfig {
        name: name.to_string(),
        endpoint: EndpointConfig {
            path: path.to_string(),
            methods: vec!["post".to_string()],
            response: Some(ResponseConfig::default()),
        },
        subject: subject.map(|name| SubjectConfig {
            name: name.to_string(),
            version: 1,
        }),
        request: channel(request_topic, 1000),
        response: response_topic.map(|topic| channel(topic, reply_timeout_ms)),
    }
}

pub fn fast_startup() -> StartupConfig {
    StartupConfig {
        timeout_ms: 2000,
        check_interval_ms: 20,
    }
}

pub fn cache_config() -> CacheConfig {
    CacheConfig { expire_ms: 15_000 }
}

type RegistryState = Arc<HashMap<String, Vec<(i32, i32, String)>>>;

/// Spin up a throwaway schema registry speaking the Confluent REST subset the
/// resolver uses. Returns the base URL.
pub async fn mock_registry(subjects: &[(&str, &[(i32, i32, &str)])]) -> String {
    let mut state = HashMap::new();
    for (subject, versions) in subjects {
        state.insert(
            subject.to_string(),
            versions
                .iter()
                .map(|(version, id, schema)| (*version, *id, schema.to_string()))
                .collect(),
        );
    }
    let state: RegistryState = Arc::new(state);

    let app = axum::Router::new()
        .route("/subjects", get(list_subjects))
        .route("/subjects/:subject/versions", get(list_versions))
        .route("/subjects/:subject/versions/:version", get(get_version))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock registry");
    let addr = listener.local_addr().expect("mock registry addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    format!("http://{addr}")
}

async fn list_subjects(State(state): State<RegistryState>) -> Json<Vec<String>> {
    Json(state.keys().cloned().collect())
}

async fn list_versions(
    State(state): State<RegistryState>,
    Path(subject): Path<String>,
) -> Response {
    match state.get(&subject) {
        Some(versions) => {
            Json(versions.iter().map(|(version, _, _)| *version).collect::<Vec<_>>())
                .into_response()
        }
        None => subject_not_found(&subject),
    }
}

async fn get_version(
    State(state): State<RegistryState>,
    Path((subject, version)): Path<(String, i32)>,
) -> Response {
    let Some(versions) = state.get(&subject) else {
        return subject_not_found(&subject);
    };
    match versions.iter().find(|(v, _, _)| *v == version) {
        Some((version, id, schema)) => {
            Json(json!({ "id": id, "version": version, "schema": schema })).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error_code": 40402, "message": "Version not found." })),
        )
            .into_response(),
    }
}

fn subject_not_found(subject: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error_code": 40401,
            "message": format!("Subject '{subject}' not found.")
        })),
    )
        .into_response()
}
