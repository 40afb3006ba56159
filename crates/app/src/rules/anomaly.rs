//! Out-of-range readings.
//!
//! Static limits (per serial prefix) and percentile bounds learned from the
//! device's own history are fused into one range; a reading outside it,
//! beyond a tolerance band, is an anomaly.

use async_trait::async_trait;
use chrono::TimeDelta;
use serde::Deserialize;
use serde_json::{Value, json};

use hubwatch_domain::bounds::{Bounds, HistoryParams, historical_bounds};
use hubwatch_domain::device::Device;
use hubwatch_domain::error::HubError;
use hubwatch_domain::event::EventKind;
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::sample::{HistoricalSample, metric_values};
use hubwatch_domain::signal::Signal;
use hubwatch_domain::time::{Timestamp, now};

use super::{BatchRequest, Cooldowns, Rule, RuleContext};

/// Registry name.
pub const NAME: &str = "anomaly";

/// Window scanned by a batch run when the request names none.
pub const DEFAULT_BATCH_DAYS: u32 = 7;

/// Tuning of [`AnomalyRule`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnomalySettings {
    /// Minimum samples before history contributes bounds.
    pub hist_min_points: usize,
    /// Trailing history window, in days.
    pub hist_window_days: u32,
    /// Lower percentile of the historical range.
    pub p_low: f64,
    /// Upper percentile of the historical range.
    pub p_high: f64,
    /// Historical padding as a fraction of the percentile span.
    pub pad_frac: f64,
    /// Historical padding floor.
    pub pad_abs: f64,
    /// Minimum delay between two notifications for one (device, metric).
    pub cooldown_secs: u64,
    /// Tolerance as a fraction of the fused span.
    pub tol_frac: f64,
    /// Tolerance floor.
    pub tol_abs: f64,
    /// Cap on samples loaded per evaluation.
    pub sample_limit: usize,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        let history = HistoryParams::default();
        Self {
            hist_min_points: history.min_points,
            hist_window_days: 30,
            p_low: history.p_low,
            p_high: history.p_high,
            pad_frac: history.pad_frac,
            pad_abs: history.pad_abs,
            cooldown_secs: 60,
            tol_frac: 0.02,
            tol_abs: 0.5,
            sample_limit: 5000,
        }
    }
}

impl AnomalySettings {
    fn history_params(&self) -> HistoryParams {
        HistoryParams {
            min_points: self.hist_min_points,
            p_low: self.p_low,
            p_high: self.p_high,
            pad_frac: self.pad_frac,
            pad_abs: self.pad_abs,
        }
    }
}

/// Flags readings outside the fused static and historical bounds.
#[derive(Default)]
pub struct AnomalyRule {
    settings: AnomalySettings,
    cooldowns: Cooldowns<(DeviceId, String)>,
}

impl AnomalyRule {
    /// Create the rule.
    #[must_use]
    pub fn new(settings: AnomalySettings) -> Self {
        Self {
            settings,
            cooldowns: Cooldowns::default(),
        }
    }

    fn fused_bounds(&self, ctx: &RuleContext, device: &Device, metric: &str, history: &[HistoricalSample]) -> Bounds {
        let limits = ctx
            .standards
            .limits
            .first_match(device.id.as_str())
            .and_then(|limits| limits.get(metric))
            .and_then(|limit| limit.bounds());
        let learned = historical_bounds(&metric_values(history, metric), self.settings.history_params());
        Bounds::fuse(limits.iter().chain(learned.iter()))
    }

    async fn load_history(
        &self,
        ctx: &RuleContext,
        device_id: &DeviceId,
        until: Timestamp,
        days: u32,
    ) -> Result<Vec<HistoricalSample>, HubError> {
        let since = until - TimeDelta::days(i64::from(days));
        ctx.history
            .range(device_id, since, until, self.settings.sample_limit)
            .await
    }

    fn publish_anomaly(ctx: &RuleContext, device: &Device, metric: &str, value: f64, bounds: &Bounds, at: Timestamp) {
        let event = ctx
            .event(EventKind::Anomaly, NAME, at)
            .for_device(device.id.clone())
            .with("metric", metric)
            .with("value", value)
            .with("bounds", bounds_json(bounds));
        ctx.publish(event);
    }
}

fn bounds_json(bounds: &Bounds) -> Value {
    json!({"min": bounds.min, "max": bounds.max, "source": bounds.source})
}

#[async_trait]
impl Rule for AnomalyRule {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn on_measure(
        &self,
        ctx: &RuleContext,
        device: &Device,
        signal: &Signal,
        at: Timestamp,
    ) -> Result<(), HubError> {
        if !device.claimed {
            return Ok(());
        }
        let Some((metric, value)) = signal.numeric() else {
            return Ok(());
        };

        let history = self
            .load_history(ctx, &device.id, at, self.settings.hist_window_days)
            .await?;
        let bounds = self.fused_bounds(ctx, device, metric, &history);
        if bounds.is_empty() {
            return Ok(());
        }
        let tol = bounds.tolerance(self.settings.tol_abs, self.settings.tol_frac);
        if !bounds.is_violated_by(value, tol) {
            return Ok(());
        }
        if !self
            .cooldowns
            .try_acquire((device.id.clone(), metric.to_string()), at, self.settings.cooldown_secs)
        {
            tracing::debug!(device_id = %device.id, metric, "anomaly suppressed by cooldown");
            return Ok(());
        }
        tracing::info!(device_id = %device.id, metric, value, "anomaly detected");
        Self::publish_anomaly(ctx, device, metric, value, &bounds, at);
        Ok(())
    }

    async fn run_batch(
        &self,
        ctx: &RuleContext,
        device: &Device,
        request: &BatchRequest,
    ) -> Result<(), HubError> {
        let started = now();
        let days = request.days.unwrap_or(DEFAULT_BATCH_DAYS);
        let Some(metric) = request.metric.as_deref() else {
            ctx.done(NAME, &device.id, started, json!({"found": 0, "reason": "unsupported"}));
            return Ok(());
        };
        if !device.claimed {
            ctx.done(
                NAME,
                &device.id,
                started,
                json!({"metric": metric, "window_days": days, "found": 0, "reason": "unclaimed"}),
            );
            return Ok(());
        }

        let samples = self.load_history(ctx, &device.id, started, days).await?;
        let bounds = self.fused_bounds(ctx, device, metric, &samples);
        if bounds.is_empty() {
            ctx.done(
                NAME,
                &device.id,
                now(),
                json!({"metric": metric, "window_days": days, "found": 0, "reason": "no_bounds"}),
            );
            return Ok(());
        }

        let tol = bounds.tolerance(self.settings.tol_abs, self.settings.tol_frac);
        let mut found = 0u64;
        for sample in &samples {
            let Some(value) = sample.metric(metric) else {
                continue;
            };
            if bounds.is_violated_by(value, tol) {
                Self::publish_anomaly(ctx, device, metric, value, &bounds, sample.recorded_at);
                found += 1;
            }
        }
        tracing::info!(device_id = %device.id, metric, found, "anomaly batch finished");
        ctx.done(
            NAME,
            &device.id,
            now(),
            json!({"metric": metric, "window_days": days, "found": found}),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{Harness, drain};
    use hubwatch_domain::device::Device;
    use serde_json::Map;

    fn thermometer(claimed: bool) -> Device {
        Device::builder()
            .serial("TMP0001")
            .claimed(claimed)
            .build()
            .unwrap()
    }

    fn sample(device: &Device, at: Timestamp, value: f64) -> HistoricalSample {
        let mut fields = Map::new();
        fields.insert("temperatura".to_string(), json!(value));
        HistoricalSample::new(device.id.clone(), at, fields)
    }

    #[tokio::test]
    async fn should_flag_reading_outside_static_limits_once_per_cooldown() {
        let device = thermometer(true);
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let rule = AnomalyRule::default();
        let t0 = now();

        let signal = Signal::metric("temperatura", 45.0);
        rule.on_measure(&harness.ctx, &device, &signal, t0).await.unwrap();
        rule.on_measure(&harness.ctx, &device, &signal, t0 + TimeDelta::seconds(10))
            .await
            .unwrap();

        let events = drain(&mut sub);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Anomaly);
        assert_eq!(events[0].field("metric"), Some(&json!("temperatura")));
        assert_eq!(events[0].field("bounds").unwrap()["source"], json!("limits"));

        rule.on_measure(&harness.ctx, &device, &signal, t0 + TimeDelta::seconds(61))
            .await
            .unwrap();
        assert_eq!(drain(&mut sub).len(), 1);
    }

    #[tokio::test]
    async fn should_apply_tolerance_band() {
        // limits 18..32, span 14: tol = max(0.5, 0.28) = 0.5
        let device = thermometer(true);
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let rule = AnomalyRule::default();

        rule.on_measure(&harness.ctx, &device, &Signal::metric("temperatura", 17.5), now())
            .await
            .unwrap();
        assert!(drain(&mut sub).is_empty());

        rule.on_measure(&harness.ctx, &device, &Signal::metric("temperatura", 17.49), now())
            .await
            .unwrap();
        assert_eq!(drain(&mut sub).len(), 1);
    }

    #[tokio::test]
    async fn should_ignore_unclaimed_devices_and_non_numeric_values() {
        let harness = Harness::new([]);
        let mut sub = harness.subscribe();
        let rule = AnomalyRule::default();

        rule.on_measure(&harness.ctx, &thermometer(false), &Signal::metric("temperatura", 99.0), now())
            .await
            .unwrap();
        rule.on_measure(&harness.ctx, &thermometer(true), &Signal::metric("temperatura", true), now())
            .await
            .unwrap();
        rule.on_measure(&harness.ctx, &thermometer(true), &Signal::metric("temperatura", "45.0"), now())
            .await
            .unwrap();
        rule.on_measure(&harness.ctx, &thermometer(true), &Signal::Heartbeat, now())
            .await
            .unwrap();

        assert!(drain(&mut sub).is_empty());
    }

    #[tokio::test]
    async fn should_skip_metric_without_any_bounds() {
        let device = thermometer(true);
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let rule = AnomalyRule::default();

        rule.on_measure(&harness.ctx, &device, &Signal::metric("presion", 5000.0), now())
            .await
            .unwrap();
        assert!(drain(&mut sub).is_empty());
    }

    #[tokio::test]
    async fn should_tighten_limits_with_history() {
        let device = thermometer(true);
        let harness = Harness::new([device.clone()]);
        let t0 = now();
        for i in 0..200 {
            let value = 24.0 + f64::from(i % 3);
            harness
                .history
                .samples
                .lock()
                .unwrap()
                .push(sample(&device, t0 - TimeDelta::minutes(i64::from(i) + 1), value));
        }
        let mut sub = harness.subscribe();
        let rule = AnomalyRule::default();

        rule.on_measure(&harness.ctx, &device, &Signal::metric("temperatura", 29.0), t0)
            .await
            .unwrap();

        let events = drain(&mut sub);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].field("bounds").unwrap()["source"], json!("limits+hist"));
    }

    #[tokio::test]
    async fn should_report_every_anomalous_sample_in_batch() {
        let device = thermometer(true);
        let harness = Harness::new([device.clone()]);
        let t0 = now();
        for (i, value) in [20.0, 40.0, 25.0, 10.0].into_iter().enumerate() {
            let minutes = i64::try_from(i).unwrap() + 1;
            harness
                .history
                .samples
                .lock()
                .unwrap()
                .push(sample(&device, t0 - TimeDelta::minutes(minutes), value));
        }
        let mut sub = harness.subscribe();
        let rule = AnomalyRule::default();

        let request = BatchRequest {
            device_id: device.id.clone(),
            metric: Some("temperatura".to_string()),
            days: Some(1),
        };
        rule.run_batch(&harness.ctx, &device, &request).await.unwrap();

        let events = drain(&mut sub);
        let anomalies = events.iter().filter(|e| e.kind == EventKind::Anomaly).count();
        assert_eq!(anomalies, 2);
        let done = events.last().unwrap();
        assert_eq!(done.kind, EventKind::Done);
        assert_eq!(done.field("found"), Some(&json!(2)));
        assert_eq!(done.field("window_days"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn should_finish_batch_with_reason_codes() {
        let harness = Harness::new([]);
        let mut sub = harness.subscribe();
        let rule = AnomalyRule::default();

        let unclaimed = thermometer(false);
        let mut request = BatchRequest::for_device(unclaimed.id.clone());
        request.metric = Some("temperatura".to_string());
        rule.run_batch(&harness.ctx, &unclaimed, &request).await.unwrap();

        let claimed = thermometer(true);
        request.metric = Some("presion".to_string());
        rule.run_batch(&harness.ctx, &claimed, &request).await.unwrap();

        let reasons: Vec<Value> = drain(&mut sub)
            .iter()
            .map(|e| e.field("reason").cloned().unwrap_or(Value::Null))
            .collect();
        assert_eq!(reasons, vec![json!("unclaimed"), json!("no_bounds")]);
    }
}
