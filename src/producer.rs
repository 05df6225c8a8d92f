#![forbid(unsafe_code)]

use crate::codec::PayloadCodec;
use crate::config::RouteConfig;
use crate::error::{Error, Result};
use crate::schema::SchemaRegistry;
use crate::transport::broker::{BrokerHeader, RecordPublisher, CORRELATION_HEADER};
use std::collections::HashMap;
use tracing::{error, info};

/// One publisher per configured route path, each bound to the route's request
/// channel and schema. Built once at startup; any schema-resolution failure
/// is fatal.
pub struct ProducerGroup<P: RecordPublisher> {
    publishers: HashMap<String, RoutePublisher<P>>,
}

struct RoutePublisher<P> {
    route: String,
    topic: String,
    codec: PayloadCodec,
    publisher: P,
}

impl<P: RecordPublisher> ProducerGroup<P> {
    /// Walk the route table, resolving a schema and constructing a publisher
    /// per route. The factory seam mirrors the consumer side so tests inject
    /// in-memory publishers.
    pub async fn build_with<F>(
        routes: &[RouteConfig],
        registry: &SchemaRegistry,
        mut factory: F,
    ) -> Result<Self>
    where
        F: FnMut(&RouteConfig) -> Result<P>,
    {
        let mut publishers = HashMap::new();

        for route in routes {
            let path = &route.endpoint.path;

            let resolved = match &route.subject {
                Some(subject) => {
                    info!(
                        route = %route.name,
                        subject = %subject.name,
                        version = subject.version,
                        "resolving request schema"
                    );
                    Some(registry.resolve(&subject.name, subject.version).await?)
                }
                None => None,
            };

            let codec = PayloadCodec::for_channel(route.request.serializer, resolved.as_ref())?;
            let publisher = factory(route)?;

            info!(
                route = %route.name,
                path = %path,
                topic = %route.request.topic,
                "registering producer"
            );

            publishers.insert(
                path.clone(),
                RoutePublisher {
                    route: route.name.clone(),
                    topic: route.request.topic.clone(),
                    codec,
                    publisher,
                },
            );
        }

        Ok(Self { publishers })
    }

    /// Validate, encode, and publish one request body, blocking until the
    /// broker acknowledges. The correlation key travels both as the record
    /// key and as the `causeway-key` header.
    pub async fn publish(
        &self,
        path: &str,
        correlation_key: &str,
        raw_body: &[u8],
        extra_headers: &[(String, String)],
    ) -> Result<()> {
        let entry = self
            .publishers
            .get(path)
            .ok_or_else(|| Error::RouteNotFound {
                path: path.to_string(),
            })?;

        let payload = entry.codec.encode(path, raw_body)?;

        let mut headers = Vec::with_capacity(extra_headers.len() + 1);
        headers.push(BrokerHeader::new(
            CORRELATION_HEADER,
            correlation_key.as_bytes(),
        ));
        for (key, value) in extra_headers {
            headers.push(BrokerHeader::new(key.clone(), value.as_bytes()));
        }

        info!(
            route = %entry.route,
            path = %path,
            key = %correlation_key,
            "publishing request"
        );

        entry
            .publisher
            .send(correlation_key, &payload, &headers)
            .await
            .map_err(|err| {
                error!(
                    route = %entry.route,
                    topic = %entry.topic,
                    error = %err,
                    "publish failed"
                );
                Error::Publish {
                    topic: entry.topic.clone(),
                    reason: err.to_string(),
                }
            })
    }

    pub fn len(&self) -> usize {
        self.publishers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty()
    }
}
