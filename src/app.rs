use crate::cache::ReplyCache;
use crate::config::CausewayConfig;
use crate::consumer::{ConsumerGroup, ConsumerPlan};
use crate::error::{Error, Result};
use crate::producer::ProducerGroup;
use crate::router::Router;
use crate::schema::SchemaRegistry;
use crate::transport::http::{serve, BridgeState};
use crate::transport::kafka::{KafkaPublisher, KafkaSubscriber};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Bootstraps and runs the bridge. Initialization order is load-bearing: the
/// consumer group must reach readiness before the router is constructed and
/// traffic is accepted, otherwise a reply could arrive with no worker to
/// catch it.
pub struct CausewayApp {
    config: CausewayConfig,
    state: Arc<BridgeState<KafkaPublisher>>,
    shutdown: CancellationToken,
}

impl CausewayApp {
    pub async fn initialise(config: CausewayConfig) -> Result<Self> {
        let registry = SchemaRegistry::new(&config.kafka.schema_registry_url)?;
        let cache = Arc::new(ReplyCache::new());
        let shutdown = CancellationToken::new();

        let plan = ConsumerPlan::from_routes(&config.routes)?;
        info!(
            topics = plan.topics.len(),
            "consumer plan built from route table"
        );

        let kafka = config.kafka.clone();
        let consumers = ConsumerGroup::bootstrap_with(
            plan,
            &registry,
            Arc::clone(&cache),
            shutdown.clone(),
            |planned| {
                KafkaSubscriber::from_channel(&kafka, &planned.channel)
                    .map_err(|err| Error::ConsumerStartup {
                        reason: err.to_string(),
                    })
            },
        )
        .await?;
        consumers.wait_ready(&config.startup).await?;

        let kafka = config.kafka.clone();
        let producers =
            ProducerGroup::build_with(&config.routes, &registry, |route| {
                KafkaPublisher::from_channel(&kafka, &route.request).map_err(|err| {
                    Error::Publish {
                        topic: route.request.topic.clone(),
                        reason: err.to_string(),
                    }
                })
            })
            .await?;

        let router = Router::new(&config.routes, producers, Arc::clone(&cache), &config.cache);
        let state = Arc::new(BridgeState { router, consumers });

        Ok(Self {
            config,
            state,
            shutdown,
        })
    }

    /// Serve until ctrl-c.
    pub async fn run(self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });

        serve(
            &self.config.http.listen,
            Arc::clone(&self.state),
            self.shutdown.clone(),
        )
        .await
    }
}
