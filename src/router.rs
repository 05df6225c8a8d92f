#![forbid(unsafe_code)]

use crate::cache::ReplyCache;
use crate::codec::to_text_form;
use crate::config::{CacheConfig, ResponseConfig, RouteConfig};
use crate::error::{Error, Result};
use crate::producer::ProducerGroup;
use crate::transport::broker::RecordPublisher;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

/// Rendered outcome of one routed call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingOutcome {
    pub status: u16,
    pub content_type: String,
    pub payload: String,
}

/// Orchestrates one inbound call: resolve the route, publish the request,
/// and, when the route expects a reply, await the correlated response.
///
/// Constructed only after the consumer group has reached readiness, so a
/// reply can never arrive before a worker exists to catch it.
pub struct Router<P: RecordPublisher> {
    routes: HashMap<String, RouteConfig>,
    producers: ProducerGroup<P>,
    cache: Arc<ReplyCache>,
    retention: Duration,
}

impl<P: RecordPublisher> Router<P> {
    pub fn new(
        routes: &[RouteConfig],
        producers: ProducerGroup<P>,
        cache: Arc<ReplyCache>,
        cache_config: &CacheConfig,
    ) -> Self {
        let routes = routes
            .iter()
            .map(|route| (route.endpoint.path.clone(), route.clone()))
            .collect();

        Self {
            routes,
            producers,
            cache,
            retention: Duration::from_millis(cache_config.expire_ms),
        }
    }

    /// Exact-path lookup plus a case-insensitive method check.
    pub fn resolve(&self, method: &str, path: &str) -> Result<&RouteConfig> {
        let route = self.routes.get(path).ok_or_else(|| {
            warn!(path = %path, "path is not found");
            Error::RouteNotFound {
                path: path.to_string(),
            }
        })?;

        let allowed = route
            .endpoint
            .methods
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(method));

        if !allowed {
            return Err(Error::MethodNotAllowed {
                method: method.to_string(),
                path: path.to_string(),
            });
        }

        Ok(route)
    }

    pub async fn route(
        &self,
        method: &str,
        path: &str,
        body: &[u8],
        headers: &[(String, String)],
    ) -> Result<RoutingOutcome> {
        info!(
            method = %method,
            path = %path,
            bytes = body.len(),
            "routing request"
        );

        let route = self.resolve(method, path)?;
        let response_config = route
            .endpoint
            .response
            .clone()
            .unwrap_or_default();
        let correlation_key = Uuid::new_v4().to_string();

        // Registered before publish so a fast reply cannot beat the waiter.
        let notify = route
            .response
            .as_ref()
            .map(|_| self.cache.register_waiter(&correlation_key));

        let published = self
            .producers
            .publish(path, &correlation_key, body, headers)
            .await;
        if let Err(err) = published {
            if notify.is_some() {
                self.cache.release_waiter(&correlation_key);
            }
            return Err(err);
        }

        let (Some(response_channel), Some(notify)) = (&route.response, notify) else {
            info!(path = %path, "no response channel, dispatching only");
            return Ok(render(&response_config, response_config.body.clone()));
        };

        let result = self
            .await_reply(
                path,
                &correlation_key,
                &notify,
                response_channel.timeout_ms,
            )
            .await;

        self.cache.release_waiter(&correlation_key);
        self.cache.expire_older_than(self.retention);

        result.map(|payload| render(&response_config, payload))
    }

    async fn await_reply(
        &self,
        path: &str,
        correlation_key: &str,
        notify: &tokio::sync::Notify,
        timeout_ms: u64,
    ) -> Result<String> {
        info!(
            timeout_ms = timeout_ms,
            key = %correlation_key,
            "waiting for correlated reply"
        );

        let wait = async {
            loop {
                if let Some(entry) = self.cache.get(correlation_key) {
                    return entry;
                }
                notify.notified().await;
            }
        };

        match timeout(Duration::from_millis(timeout_ms), wait).await {
            Ok(entry) => Ok(to_text_form(&entry.payload)),
            Err(_) => {
                warn!(
                    path = %path,
                    timeout_ms = timeout_ms,
                    "no reply within timeout"
                );
                Err(Error::ReplyTimeout {
                    path: path.to_string(),
                    timeout_ms,
                })
            }
        }
    }
}

fn render(config: &ResponseConfig, payload: String) -> RoutingOutcome {
    RoutingOutcome {
        status: config.http_code,
        content_type: config.content_type.clone(),
        payload,
    }
}
