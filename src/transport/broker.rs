#![forbid(unsafe_code)]

use async_trait::async_trait;

/// Header carrying the correlation key on every published record. A
/// downstream worker may rewrite the record key; this header preserves
/// traceability back to the original correlation id and, when present on a
/// reply, overrides the record key.
pub const CORRELATION_HEADER: &str = "causeway-key";

#[derive(Clone, Debug)]
pub struct BrokerRecord {
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
    pub headers: Vec<BrokerHeader>,
}

impl BrokerRecord {
    /// First header value for a key, if any.
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|header| header.key == key)
            .map(|header| header.value.as_slice())
    }
}

#[derive(Clone, Debug)]
pub struct BrokerHeader {
    pub key: String,
    pub value: Vec<u8>,
}

impl BrokerHeader {
    pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Synchronous publish-and-confirm seam. One publisher is bound to one topic;
/// `send` blocks until the broker acknowledges or the channel timeout elapses.
#[async_trait]
pub trait RecordPublisher: Send + Sync + 'static {
    async fn send(
        &self,
        key: &str,
        payload: &[u8],
        headers: &[BrokerHeader],
    ) -> Result<(), BrokerError>;
}

/// Subscribe-and-poll seam for consumer workers.
#[async_trait]
pub trait RecordConsumer: Send + 'static {
    async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError>;
    async fn poll(&mut self) -> Result<Option<BrokerRecord>, BrokerError>;
}

#[derive(Clone, Debug)]
pub struct BrokerError {
    message: String,
}

impl BrokerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BrokerError {}
