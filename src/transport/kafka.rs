#![forbid(unsafe_code)]

use crate::config::{ChannelConfig, KafkaConfig};
use crate::transport::broker::{
    BrokerError, BrokerHeader, BrokerRecord, RecordConsumer, RecordPublisher,
};
use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::time::Duration;
use tracing::info;

/// rdkafka-backed publisher bound to one topic, sending synchronously with
/// the channel's ack timeout.
pub struct KafkaPublisher {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaPublisher {
    pub fn from_channel(kafka: &KafkaConfig, channel: &ChannelConfig) -> Result<Self, BrokerError> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &kafka.brokers)
            .set("client.id", &channel.client_id)
            .set("message.timeout.ms", channel.timeout_ms.to_string());

        if let Some(acks) = &channel.acks {
            config.set("acks", acks);
        }
        for (key, value) in kafka.properties.iter().chain(channel.properties.iter()) {
            config.set(key, value);
        }

        info!(
            topic = %channel.topic,
            timeout_ms = channel.timeout_ms,
            "creating kafka producer"
        );

        let producer = config
            .create()
            .map_err(|err| BrokerError::new(format!("failed to create producer: {err}")))?;

        Ok(Self {
            producer,
            topic: channel.topic.clone(),
            timeout: Duration::from_millis(channel.timeout_ms),
        })
    }
}

#[async_trait]
impl RecordPublisher for KafkaPublisher {
    async fn send(
        &self,
        key: &str,
        payload: &[u8],
        headers: &[BrokerHeader],
    ) -> Result<(), BrokerError> {
        let mut owned_headers = OwnedHeaders::new_with_capacity(headers.len());
        for header in headers {
            owned_headers = owned_headers.insert(Header {
                key: &header.key,
                value: Some(&header.value),
            });
        }

        let record = FutureRecord::to(&self.topic)
            .key(key)
            .payload(payload)
            .headers(owned_headers);

        self.producer
            .send(record, self.timeout)
            .await
            .map(|_| ())
            .map_err(|(err, _)| BrokerError::new(err.to_string()))
    }
}

/// rdkafka-backed consumer for one response topic.
pub struct KafkaSubscriber {
    consumer: StreamConsumer,
}

impl KafkaSubscriber {
    pub fn from_channel(kafka: &KafkaConfig, channel: &ChannelConfig) -> Result<Self, BrokerError> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &kafka.brokers)
            .set("group.id", &channel.group_id)
            .set("client.id", &channel.client_id)
            .set("auto.offset.reset", "latest")
            .set("enable.auto.commit", "true");

        for (key, value) in kafka.properties.iter().chain(channel.properties.iter()) {
            config.set(key, value);
        }

        info!(
            topic = %channel.topic,
            group_id = %channel.group_id,
            "creating kafka consumer"
        );

        let consumer = config
            .create()
            .map_err(|err| BrokerError::new(format!("failed to create consumer: {err}")))?;

        Ok(Self { consumer })
    }
}

#[async_trait]
impl RecordConsumer for KafkaSubscriber {
    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
        self.consumer
            .subscribe(&[topic])
            .map_err(|err| BrokerError::new(format!("subscribe to `{topic}` failed: {err}")))
    }

    async fn poll(&mut self) -> Result<Option<BrokerRecord>, BrokerError> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|err| BrokerError::new(err.to_string()))?;

        let mut headers = Vec::new();
        if let Some(borrowed) = message.headers() {
            for header in borrowed.iter() {
                headers.push(BrokerHeader {
                    key: header.key.to_string(),
                    value: header.value.map(<[u8]>::to_vec).unwrap_or_default(),
                });
            }
        }

        Ok(Some(BrokerRecord {
            key: message.key().map(<[u8]>::to_vec),
            payload: message.payload().map(<[u8]>::to_vec),
            headers,
        }))
    }
}
