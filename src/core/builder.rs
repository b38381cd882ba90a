use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::{
    broker::{QueueRef, Topic},
    core::{DispatcherConfig, PipelineConfig},
    error::PipelineError,
    events::Bus,
    handlers::HandlerRef,
    subscribers::{Subscribe, SubscriberSet},
};
use super::{dispatcher::Dispatcher, pipeline::Pipeline};

/// Binds one subscriber queue to the handler that drains it.
#[derive(Clone)]
pub struct Route {
    queue: QueueRef,
    handler: HandlerRef,
    cfg: DispatcherConfig,
}

impl Route {
    /// Creates a route with [`DispatcherConfig::default`].
    pub fn new(queue: QueueRef, handler: HandlerRef) -> Self {
        Self {
            queue,
            handler,
            cfg: DispatcherConfig::default(),
        }
    }

    /// Overrides the dispatcher budget for this queue only.
    pub fn with_config(mut self, cfg: DispatcherConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn queue(&self) -> &QueueRef {
        &self.queue
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.cfg
    }
}

/// Builder for a [`Pipeline`].
pub struct PipelineBuilder {
    cfg: PipelineConfig,
    topic_name: String,
    routes: Vec<Route>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl PipelineBuilder {
    /// Creates a builder with the given configuration and no routes.
    pub fn new(cfg: PipelineConfig) -> Self {
        Self {
            cfg,
            topic_name: "object-created".to_string(),
            routes: Vec::new(),
            subscribers: Vec::new(),
        }
    }

    /// Names the ingress topic (used in events and logs).
    pub fn with_topic_name(mut self, name: impl Into<String>) -> Self {
        self.topic_name = name.into();
        self
    }

    /// Adds a subscriber queue and its handler. Order is fan-out order.
    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.push(route);
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events through dedicated workers with
    /// bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Validates the routes and wires bus, topic, dispatchers and observers.
    ///
    /// Must be called inside a tokio runtime: observer workers are spawned here.
    ///
    /// # Errors
    /// [`PipelineError::InvalidConfig`] for an empty topic name, a duplicate
    /// queue name, or an invalid [`DispatcherConfig`].
    pub fn build(self) -> Result<Arc<Pipeline>, PipelineError> {
        if self.topic_name.trim().is_empty() {
            return Err(PipelineError::InvalidConfig {
                reason: "topic name must not be empty".into(),
            });
        }

        let mut seen = HashSet::new();
        for route in &self.routes {
            let name = route.queue.name();
            if !seen.insert(name.to_string()) {
                return Err(PipelineError::InvalidConfig {
                    reason: format!("queue '{name}' is routed twice"),
                });
            }
            route.cfg.validate()?;
            if let Some(policy) = route.queue.visibility_policy() {
                if !route.cfg.fits_visibility(&policy) {
                    warn!(
                        queue = name,
                        visibility = ?policy.visibility_timeout,
                        window = ?route.cfg.batch_window,
                        timeout = ?route.cfg.processing_timeout,
                        "visibility timeout shorter than batch window plus handler timeout; expect duplicate deliveries"
                    );
                }
            }
        }

        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));

        let topic = Topic::new(
            self.topic_name,
            self.routes.iter().map(|r| Arc::clone(&r.queue)).collect(),
        )
        .with_retry(self.cfg.publish_retry)
        .with_bus(bus.clone());

        let dispatchers = self
            .routes
            .into_iter()
            .map(|r| Dispatcher::new(r.queue, r.handler, r.cfg, bus.clone()))
            .collect();

        let pipeline = Arc::new(Pipeline::new_internal(self.cfg, bus, subs, topic, dispatchers));
        pipeline.subscriber_listener();
        Ok(pipeline)
    }
}
