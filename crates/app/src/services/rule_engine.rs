//! Rule engine: the entry point ingestion and operators call into.
//!
//! `dispatch` fans one signal out to every registered rule, one dispatcher
//! job per rule. `run_batch` acknowledges with a `progress` event and queues
//! the audit; its findings follow asynchronously.

use std::sync::Arc;

use serde_json::Value;

use hubwatch_domain::device::Device;
use hubwatch_domain::error::{HubError, NotFoundError};
use hubwatch_domain::event::EventKind;
use hubwatch_domain::signal::Signal;
use hubwatch_domain::time::{Timestamp, now};

use crate::dispatcher::{Dispatcher, Job};
use crate::error::{DispatchError, EngineError};
use crate::rules::{BatchRequest, RuleContext, RuleRegistry};

/// Drives registered rules through the dispatcher.
#[derive(Clone)]
pub struct RuleEngine {
    registry: Arc<RuleRegistry>,
    dispatcher: Arc<Dispatcher>,
    context: RuleContext,
}

impl RuleEngine {
    /// Create an engine over a registry, a (started) dispatcher and the
    /// context handed to every rule call.
    pub fn new(registry: RuleRegistry, dispatcher: Arc<Dispatcher>, context: RuleContext) -> Self {
        Self {
            registry: Arc::new(registry),
            dispatcher,
            context,
        }
    }

    /// The context rules receive.
    #[must_use]
    pub fn context(&self) -> &RuleContext {
        &self.context
    }

    /// Registered rule names, in evaluation order.
    #[must_use]
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.registry.names()
    }

    /// Queue one evaluation of `signal` per registered rule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Dispatch`] when the dispatcher is not running.
    pub fn dispatch(&self, device: &Device, signal: &Signal, at: Timestamp) -> Result<(), EngineError> {
        for (name, rule) in self.registry.iter() {
            let rule = Arc::clone(rule);
            let ctx = self.context.clone();
            let device = device.clone();
            let signal = signal.clone();
            self.dispatcher.submit(Job::new(name, async move {
                rule.on_measure(&ctx, &device, &signal, at).await
            }))?;
        }
        tracing::trace!(device_id = %device.id, signal = signal.label(), "signal dispatched");
        Ok(())
    }

    /// Acknowledge and queue a batch run of one rule.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownRule`] for an unregistered name,
    /// [`EngineError::Hub`] wrapping a not-found error for an unknown device,
    /// and [`EngineError::Dispatch`] when the dispatcher is not running.
    #[tracing::instrument(skip(self, request), fields(device_id = %request.device_id))]
    pub async fn run_batch(&self, name: &str, request: BatchRequest) -> Result<(), EngineError> {
        let rule = self
            .registry
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownRule(name.to_string()))?;
        let device = self
            .context
            .devices
            .get(&request.device_id)
            .await?
            .ok_or_else(|| NotFoundError {
                entity: "Device",
                id: request.device_id.to_string(),
            })
            .map_err(HubError::from)?;
        if !self.dispatcher.is_running() {
            return Err(DispatchError::NotInitialized.into());
        }

        let progress = self
            .context
            .event(EventKind::Progress, rule.name(), now())
            .for_device(device.id.clone())
            .with("status", "queued")
            .with("metric", request.metric.clone().map_or(Value::Null, Value::String))
            .with("window_days", request.days.map_or(Value::Null, Value::from));
        self.context.publish(progress);

        let ctx = self.context.clone();
        self.dispatcher.submit(Job::new(rule.name(), async move {
            rule.run_batch(&ctx, &device, &request).await
        }))?;
        tracing::info!(rule = name, "batch run queued");
        Ok(())
    }
}
