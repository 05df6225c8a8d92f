//! Causeway bridges synchronous HTTP calls onto an asynchronous Kafka
//! request/reply flow: each inbound call is validated against an Avro schema,
//! published to a request topic, and held until a correlated reply arrives on
//! a response topic or a timeout elapses. Routes, topics, schemas, and
//! timeouts all come from configuration.

pub mod app;
pub mod cache;
pub mod codec;
pub mod config;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod router;
pub mod schema;
pub mod telemetry;
pub mod transport;
