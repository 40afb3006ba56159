//! Liveness tracking.
//!
//! Every signal of a claimed device refreshes its last-seen time. A
//! background loop sweeps the tracked devices each tick and reports the ones
//! that went quiet, reminds while they stay quiet, and reports their return.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;

use hubwatch_domain::device::Device;
use hubwatch_domain::error::HubError;
use hubwatch_domain::event::EventKind;
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::signal::Signal;
use hubwatch_domain::time::{Timestamp, elapsed_secs, now};

use super::{BatchRequest, Rule, RuleContext};
use crate::sync::lock;

/// Registry name.
pub const NAME: &str = "offline";

/// Tuning of [`OfflineWatchdog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OfflineSettings {
    /// Silence after which a device is offline.
    pub offline_secs: u64,
    /// Sweep period.
    pub tick_secs: u64,
    /// Reminder period while offline (0 = never).
    pub remind_secs: u64,
    /// No sweep reports during this long after start.
    pub startup_grace_secs: u64,
}

impl Default for OfflineSettings {
    fn default() -> Self {
        Self {
            offline_secs: 60,
            tick_secs: 10,
            remind_secs: 60,
            startup_grace_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Liveness {
    last_seen: Timestamp,
    offline_since: Option<Timestamp>,
    last_alert: Option<Timestamp>,
}

enum Transition {
    Offline { since: Timestamp, secs: u64 },
    BackOnline { was_offline_secs: u64 },
}

#[derive(Default)]
struct Tracker {
    settings: OfflineSettings,
    devices: Mutex<HashMap<DeviceId, Liveness>>,
    started_at: Mutex<Option<Timestamp>>,
}

impl Tracker {
    fn record(&self, device_id: &DeviceId, at: Timestamp) {
        lock(&self.devices)
            .entry(device_id.clone())
            .and_modify(|l| l.last_seen = l.last_seen.max(at))
            .or_insert(Liveness {
                last_seen: at,
                offline_since: None,
                last_alert: None,
            });
    }

    fn in_grace(&self, at: Timestamp) -> bool {
        lock(&self.started_at)
            .is_some_and(|start| elapsed_secs(start, at) < self.settings.startup_grace_secs)
    }

    async fn sweep(&self, ctx: &RuleContext, at: Timestamp) -> Result<(), HubError> {
        let claimed: HashMap<DeviceId, bool> = ctx
            .devices
            .list()
            .await?
            .into_iter()
            .map(|d| (d.id, d.claimed))
            .collect();

        let transitions: Vec<(DeviceId, Transition)> = lock(&self.devices)
            .iter_mut()
            .filter(|(id, _)| claimed.get(*id).copied().unwrap_or(false))
            .filter_map(|(id, liveness)| self.step(liveness, at).map(|t| (id.clone(), t)))
            .collect();

        for (device_id, transition) in transitions {
            let event = match transition {
                Transition::Offline { since, secs } => {
                    tracing::info!(device_id = %device_id, secs, "device offline");
                    ctx.event(EventKind::Offline, NAME, at)
                        .with("seconds_offline", secs)
                        .with("since_ts_local", ctx.zone.format_local(since))
                        .with("severity", "medium")
                }
                Transition::BackOnline { was_offline_secs } => {
                    tracing::info!(device_id = %device_id, was_offline_secs, "device back online");
                    ctx.event(EventKind::BackOnline, NAME, at)
                        .with("was_offline_secs", was_offline_secs)
                        .with("severity", "info")
                }
            };
            ctx.publish(event.for_device(device_id));
        }
        Ok(())
    }

    fn step(&self, liveness: &mut Liveness, at: Timestamp) -> Option<Transition> {
        let silent = elapsed_secs(liveness.last_seen, at);
        if silent < self.settings.offline_secs {
            let since = liveness.offline_since.take()?;
            liveness.last_alert = None;
            return Some(Transition::BackOnline {
                was_offline_secs: elapsed_secs(since, liveness.last_seen),
            });
        }

        if liveness.offline_since.is_none() {
            liveness.offline_since = Some(liveness.last_seen);
        } else {
            let remind = self.settings.remind_secs;
            let due = liveness
                .last_alert
                .is_none_or(|last| elapsed_secs(last, at) >= remind);
            if remind == 0 || !due {
                return None;
            }
        }
        liveness.last_alert = Some(at);
        Some(Transition::Offline {
            since: liveness.last_seen,
            secs: silent,
        })
    }
}

async fn run(tracker: Arc<Tracker>, ctx: RuleContext) {
    let period = Duration::from_secs(tracker.settings.tick_secs.max(1));
    loop {
        tokio::time::sleep(period).await;
        let at = now();
        if tracker.in_grace(at) {
            continue;
        }
        if let Err(err) = tracker.sweep(&ctx, at).await {
            tracing::warn!(%err, "offline sweep failed");
        }
    }
}

/// Watches device liveness from a background task.
#[derive(Default)]
pub struct OfflineWatchdog {
    tracker: Arc<Tracker>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Set by [`OfflineWatchdog::stop`]; blocks the lazy start in `on_measure`.
    stopped: AtomicBool,
}

impl OfflineWatchdog {
    /// Create a stopped watchdog.
    #[must_use]
    pub fn new(settings: OfflineSettings) -> Self {
        Self {
            tracker: Arc::new(Tracker {
                settings,
                ..Tracker::default()
            }),
            task: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Spawn the sweep loop. Calling it again while running does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, ctx: RuleContext) {
        self.stopped.store(false, Ordering::SeqCst);
        self.spawn(ctx);
    }

    fn spawn(&self, ctx: RuleContext) {
        let mut task = lock(&self.task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        *lock(&self.tracker.started_at) = Some(now());
        *task = Some(tokio::spawn(run(Arc::clone(&self.tracker), ctx)));
        let settings = &self.tracker.settings;
        tracing::info!(
            tick_secs = settings.tick_secs,
            offline_secs = settings.offline_secs,
            "offline watchdog started"
        );
    }

    /// Stop the sweep loop, if running. Measurements will not restart it;
    /// only an explicit [`OfflineWatchdog::start`] does.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(task) = lock(&self.task).take() {
            task.abort();
            tracing::info!("offline watchdog stopped");
        }
    }

    /// Whether the sweep loop is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.task).as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Sweep every tracked device once, as of `at`.
    ///
    /// # Errors
    ///
    /// Returns an error when the device registry cannot be listed.
    pub async fn check(&self, ctx: &RuleContext, at: Timestamp) -> Result<(), HubError> {
        self.tracker.sweep(ctx, at).await
    }
}

#[async_trait]
impl Rule for OfflineWatchdog {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn on_measure(
        &self,
        ctx: &RuleContext,
        device: &Device,
        _signal: &Signal,
        at: Timestamp,
    ) -> Result<(), HubError> {
        if !device.claimed {
            return Ok(());
        }
        self.tracker.record(&device.id, at);
        if !self.stopped.load(Ordering::SeqCst) && !self.is_running() {
            self.spawn(ctx.clone());
        }
        Ok(())
    }

    async fn run_batch(
        &self,
        ctx: &RuleContext,
        device: &Device,
        _request: &BatchRequest,
    ) -> Result<(), HubError> {
        let at = now();
        let liveness = lock(&self.tracker.devices).get(&device.id).copied();
        let fields = match liveness {
            None => json!({"status": "unknown"}),
            Some(l) => {
                let secs = elapsed_secs(l.last_seen, at);
                let offline = l.offline_since.is_some() || secs >= self.tracker.settings.offline_secs;
                let status = if offline { "offline" } else { "online" };
                json!({"status": status, "seconds_since_seen": secs})
            }
        };
        ctx.done(NAME, &device.id, at, fields);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{Harness, drain};
    use chrono::TimeDelta;

    fn sensor(serial: &str, claimed: bool) -> Device {
        Device::builder()
            .serial(serial)
            .claimed(claimed)
            .build()
            .unwrap()
    }

    fn watchdog() -> Arc<OfflineWatchdog> {
        Arc::new(OfflineWatchdog::new(OfflineSettings {
            offline_secs: 60,
            remind_secs: 0,
            ..OfflineSettings::default()
        }))
    }

    #[tokio::test]
    async fn should_report_offline_once_and_back_online_once() {
        let device = sensor("TMP0001", true);
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let dog = watchdog();
        let t0 = now();

        dog.tracker.record(&device.id, t0);
        dog.check(&harness.ctx, t0 + TimeDelta::seconds(59)).await.unwrap();
        assert!(drain(&mut sub).is_empty());

        dog.check(&harness.ctx, t0 + TimeDelta::seconds(60)).await.unwrap();
        dog.check(&harness.ctx, t0 + TimeDelta::seconds(120)).await.unwrap();
        let events = drain(&mut sub);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Offline);
        assert_eq!(events[0].field("seconds_offline"), Some(&json!(60)));
        assert_eq!(events[0].field("severity"), Some(&json!("medium")));

        dog.tracker.record(&device.id, t0 + TimeDelta::seconds(150));
        dog.check(&harness.ctx, t0 + TimeDelta::seconds(155)).await.unwrap();
        dog.check(&harness.ctx, t0 + TimeDelta::seconds(160)).await.unwrap();
        let events = drain(&mut sub);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::BackOnline);
        assert_eq!(events[0].field("was_offline_secs"), Some(&json!(150)));
    }

    #[tokio::test]
    async fn should_remind_while_offline() {
        let device = sensor("TMP0001", true);
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let dog = Arc::new(OfflineWatchdog::new(OfflineSettings {
            offline_secs: 60,
            remind_secs: 30,
            ..OfflineSettings::default()
        }));
        let t0 = now();

        dog.tracker.record(&device.id, t0);
        for offset in [60, 80, 90, 100, 125] {
            dog.check(&harness.ctx, t0 + TimeDelta::seconds(offset)).await.unwrap();
        }

        let kinds: Vec<EventKind> = drain(&mut sub).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Offline; 3]);
    }

    #[tokio::test]
    async fn should_skip_devices_no_longer_claimed() {
        let device = sensor("TMP0001", false);
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let dog = watchdog();
        let t0 = now();

        dog.tracker.record(&device.id, t0);
        dog.check(&harness.ctx, t0 + TimeDelta::minutes(5)).await.unwrap();

        assert!(drain(&mut sub).is_empty());
    }

    #[tokio::test]
    async fn should_start_once_and_stop() {
        let harness = Harness::new([]);
        let dog = watchdog();

        dog.start(harness.ctx.clone());
        dog.start(harness.ctx.clone());
        assert!(dog.is_running());

        dog.stop();
        dog.stop();
        assert!(!dog.is_running());
    }

    #[tokio::test]
    async fn should_stay_stopped_when_measures_arrive_after_stop() {
        let device = sensor("TMP0001", true);
        let harness = Harness::new([device.clone()]);
        let dog = watchdog();

        dog.start(harness.ctx.clone());
        dog.stop();
        dog.on_measure(&harness.ctx, &device, &Signal::Heartbeat, now())
            .await
            .unwrap();
        assert!(!dog.is_running());

        dog.start(harness.ctx.clone());
        assert!(dog.is_running());
        dog.stop();
    }

    #[tokio::test]
    async fn should_track_claimed_devices_and_report_status() {
        let claimed = sensor("TMP0001", true);
        let unclaimed = sensor("TMP0002", false);
        let harness = Harness::new([claimed.clone(), unclaimed.clone()]);
        let mut sub = harness.subscribe();
        let rule = watchdog();

        rule.on_measure(&harness.ctx, &claimed, &Signal::Heartbeat, now())
            .await
            .unwrap();
        rule.on_measure(&harness.ctx, &unclaimed, &Signal::Heartbeat, now())
            .await
            .unwrap();
        assert!(rule.is_running());

        for device in [&claimed, &unclaimed] {
            rule.run_batch(&harness.ctx, device, &BatchRequest::for_device(device.id.clone()))
                .await
                .unwrap();
        }
        rule.stop();

        let statuses: Vec<_> = drain(&mut sub)
            .iter()
            .map(|e| e.field("status").cloned())
            .collect();
        assert_eq!(statuses, vec![Some(json!("online")), Some(json!("unknown"))]);
    }
}
