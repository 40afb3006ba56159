//! Learned on/off schedules.
//!
//! Every configuration change of a claimed device teaches a per-device
//! [`ScheduleModel`] what the device was doing at that time of day. The model
//! (or a labelled CSV history) yields a weekly mask which, rendered as
//! `HH:MM` windows, is proposed as a `suggest` event. For devices running on
//! their configured schedule, the proposal is only made when it drifts far
//! enough from what is configured.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

use hubwatch_domain::device::{Device, MODE_SCHEDULED};
use hubwatch_domain::error::HubError;
use hubwatch_domain::event::EventKind;
use hubwatch_domain::id::DeviceId;
use hubwatch_domain::schedule::WeekMask;
use hubwatch_domain::schedule::configured::configured_mask;
use hubwatch_domain::schedule::csv::on_fractions;
use hubwatch_domain::schedule::model::{DEFAULT_LEARNING_RATE, ScheduleModel, TimeFeatures};
use hubwatch_domain::schedule::windows::{WindowParams, render};
use hubwatch_domain::signal::Signal;
use hubwatch_domain::time::{Timestamp, elapsed_secs, now};

use super::{BatchRequest, Rule, RuleContext};
use crate::ports::{ModelStore, ScheduleCsvSource};

/// Registry name.
pub const NAME: &str = "schedule";

/// Where the learned mask comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskSource {
    /// The online model.
    #[default]
    Online,
    /// Labelled CSV history, one file per device.
    Csv,
}

/// Tuning of [`ScheduleLearnerRule`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Bin width of masks, in minutes.
    pub bin_minutes: u32,
    /// A bin is on when its probability is strictly above this.
    pub prob_threshold: f64,
    /// Shortest run of on bins kept as a window.
    pub min_span_bins: u32,
    /// Windows at most this many bins apart are merged.
    pub min_gap_bins: u32,
    /// Window edges are snapped to this many minutes.
    pub round_to_min: u32,
    /// Longest windows kept per day (0 = all).
    pub max_windows_per_day: usize,
    /// Persist the model every this many updates (0 = only on suggestions).
    pub save_every_n: u64,
    /// Minimum delay between two suggestions for one device.
    pub cooldown_secs: u64,
    /// Observations required before suggesting.
    pub min_events: u64,
    /// Load the stored model on first use.
    pub warm_start: bool,
    /// Delete stored models once per process before first use.
    pub reset_on_start: bool,
    /// Compare against the configured schedule when the device runs on it.
    pub audit_when_scheduled: bool,
    /// Minimum drift from the configured schedule worth suggesting.
    pub diff_threshold: f64,
    /// Minimum change from the last suggestion worth suggesting again.
    pub suggest_min_diff: f64,
    /// SGD step of fresh models.
    pub learning_rate: f64,
    /// Mask provider.
    pub mask_source: MaskSource,
    /// Serials allowed to use CSV masks (empty = all).
    pub csv_serials: Vec<String>,
    /// Skip devices without a CSV file instead of using the model.
    pub csv_require_file: bool,
    /// Keep only the `k` best CSV bins per day (0 = threshold).
    pub csv_top_k: usize,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        let windows = WindowParams::default();
        Self {
            bin_minutes: 30,
            prob_threshold: 0.55,
            min_span_bins: windows.min_span_bins,
            min_gap_bins: windows.min_gap_bins,
            round_to_min: windows.round_to_min,
            max_windows_per_day: windows.max_windows_per_day,
            save_every_n: 50,
            cooldown_secs: 200,
            min_events: 0,
            warm_start: true,
            reset_on_start: false,
            audit_when_scheduled: true,
            diff_threshold: 0.30,
            suggest_min_diff: 0.05,
            learning_rate: DEFAULT_LEARNING_RATE,
            mask_source: MaskSource::Online,
            csv_serials: Vec::new(),
            csv_require_file: true,
            csv_top_k: 0,
        }
    }
}

impl ScheduleSettings {
    /// Window shaping parameters.
    #[must_use]
    pub fn window_params(&self) -> WindowParams {
        WindowParams {
            min_span_bins: self.min_span_bins,
            min_gap_bins: self.min_gap_bins,
            round_to_min: self.round_to_min,
            max_windows_per_day: self.max_windows_per_day,
        }
    }

    /// Whether masks for this device come from its CSV file.
    fn uses_csv(&self, device_id: &DeviceId) -> bool {
        self.mask_source == MaskSource::Csv
            && (self.csv_serials.is_empty() || self.csv_serials.iter().any(|s| s == device_id.as_str()))
    }
}

struct LearnerState {
    model: ScheduleModel,
    total_events: u64,
    unsaved: u64,
    last_suggest: Option<Timestamp>,
    last_mask: Option<WeekMask>,
}

impl LearnerState {
    fn new(model: ScheduleModel) -> Self {
        Self {
            total_events: model.updates(),
            model,
            unsaved: 0,
            last_suggest: None,
            last_mask: None,
        }
    }
}

struct Suggestion {
    mask: WeekMask,
    current: Option<(Map<String, Value>, f64)>,
}

/// Learns device schedules and proposes them.
pub struct ScheduleLearnerRule {
    settings: ScheduleSettings,
    models: Arc<dyn ModelStore>,
    csv: Arc<dyn ScheduleCsvSource>,
    states: Mutex<HashMap<DeviceId, LearnerState>>,
}

impl ScheduleLearnerRule {
    /// Create the rule.
    #[must_use]
    pub fn new(
        settings: ScheduleSettings,
        models: Arc<dyn ModelStore>,
        csv: Arc<dyn ScheduleCsvSource>,
    ) -> Self {
        Self {
            settings,
            models,
            csv,
            states: Mutex::new(HashMap::new()),
        }
    }

    async fn initial_model(&self, device_id: &DeviceId) -> ScheduleModel {
        let fresh = ScheduleModel::new(self.settings.learning_rate);
        if self.settings.reset_on_start {
            if let Err(err) = self.models.remove(device_id).await {
                tracing::warn!(%err, device_id = %device_id, "failed to reset schedule model");
            }
            return fresh;
        }
        if !self.settings.warm_start {
            return fresh;
        }
        match self.models.load(device_id).await {
            Ok(Some(model)) if model.is_compatible() => model,
            Ok(Some(_)) => {
                tracing::warn!(device_id = %device_id, "stored schedule model is incompatible, starting fresh");
                fresh
            }
            Ok(None) => fresh,
            Err(err) => {
                tracing::warn!(%err, device_id = %device_id, "failed to load schedule model");
                fresh
            }
        }
    }

    async fn state_for<'a>(
        &self,
        states: &'a mut HashMap<DeviceId, LearnerState>,
        device_id: &DeviceId,
    ) -> &'a mut LearnerState {
        match states.entry(device_id.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let model = self.initial_model(device_id).await;
                entry.insert(LearnerState::new(model))
            }
        }
    }

    async fn save(&self, device_id: &DeviceId, state: &mut LearnerState) {
        match self.models.save(device_id, &state.model).await {
            Ok(()) => state.unsaved = 0,
            Err(err) => tracing::warn!(%err, device_id = %device_id, "failed to save schedule model"),
        }
    }

    fn online_mask(&self, state: &LearnerState) -> Result<WeekMask, HubError> {
        let s = &self.settings;
        Ok(state.model.mask(s.bin_minutes, s.prob_threshold, 0)?)
    }

    /// The mask to propose, or `None` when the device has no usable source.
    async fn learned_mask(&self, device: &Device, state: &LearnerState) -> Result<Option<WeekMask>, HubError> {
        let s = &self.settings;
        if !s.uses_csv(&device.id) {
            return self.online_mask(state).map(Some);
        }
        let text = match self.csv.read(&device.id).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(%err, device_id = %device.id, "failed to read schedule csv");
                None
            }
        };
        match text.as_deref().map(|text| on_fractions(text, s.bin_minutes)) {
            Some(Some(scores)) => Ok(Some(WeekMask::from_scores(
                s.bin_minutes,
                &scores,
                s.prob_threshold,
                s.csv_top_k,
            )?)),
            Some(None) => {
                tracing::warn!(device_id = %device.id, "schedule csv has no usable header");
                self.online_mask(state).map(Some)
            }
            None if s.csv_require_file => Ok(None),
            None => self.online_mask(state).map(Some),
        }
    }

    /// Build a suggestion. `forced` skips the hysteresis check and audits
    /// regardless of the device mode.
    async fn evaluate(
        &self,
        device: &Device,
        state: &LearnerState,
        forced: bool,
    ) -> Result<Option<Suggestion>, HubError> {
        let s = &self.settings;
        let Some(mask) = self.learned_mask(device, state).await? else {
            return Ok(None);
        };
        if mask.is_empty() {
            return Ok(None);
        }

        let audit = forced || (s.audit_when_scheduled && device.mode() == MODE_SCHEDULED);
        let current = if audit {
            let configured = configured_mask(device.config.get("horarios"), s.bin_minutes)?;
            let diff = mask.diff_ratio(&configured);
            if diff < s.diff_threshold {
                tracing::debug!(device_id = %device.id, diff, "learned schedule matches configuration");
                return Ok(None);
            }
            Some((render(&configured, &s.window_params()), diff))
        } else {
            None
        };

        if !forced
            && let Some(last) = &state.last_mask
            && mask.diff_ratio(last) < s.suggest_min_diff
        {
            return Ok(None);
        }
        Ok(Some(Suggestion { mask, current }))
    }

    async fn emit(
        &self,
        ctx: &RuleContext,
        device: &Device,
        state: &mut LearnerState,
        suggestion: Suggestion,
        at: Timestamp,
    ) {
        let s = &self.settings;
        let mut event = ctx
            .event(EventKind::Suggest, NAME, at)
            .for_device(device.id.clone())
            .with(
                "suggested_schedule",
                Value::Object(render(&suggestion.mask, &s.window_params())),
            )
            .with("bin_minutes", s.bin_minutes)
            .with("threshold", s.prob_threshold);
        if let Some((current, diff)) = suggestion.current {
            event = event
                .with("current_schedule", Value::Object(current))
                .with("diff_ratio", diff);
        }
        tracing::info!(device_id = %device.id, "schedule suggestion");
        ctx.publish(event);

        state.last_mask = Some(suggestion.mask);
        state.last_suggest = Some(at);
        self.save(&device.id, state).await;
    }
}

#[async_trait]
impl Rule for ScheduleLearnerRule {
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
        if !device.claimed || !matches!(signal, Signal::Config) {
            return Ok(());
        }
        let s = &self.settings;
        let target = device.switch_target();
        // Without an on/off target there is nothing to learn, and the model
        // alone has nothing new to suggest.
        if target.is_none() && !s.uses_csv(&device.id) {
            return Ok(());
        }
        let mut states = self.states.lock().await;
        let state = self.state_for(&mut states, &device.id).await;

        if let Some(on) = target {
            let features = TimeFeatures::from_local(ctx.zone.to_local(at));
            state.model.learn(&features, on);
            state.total_events += 1;
            state.unsaved += 1;
            if s.save_every_n > 0 && state.unsaved >= s.save_every_n {
                self.save(&device.id, state).await;
            }
        }

        if state.total_events < s.min_events {
            return Ok(());
        }
        if let Some(last) = state.last_suggest
            && elapsed_secs(last, at) < s.cooldown_secs
        {
            return Ok(());
        }
        if let Some(suggestion) = self.evaluate(device, state, false).await? {
            self.emit(ctx, device, state, suggestion, at).await;
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
        if !device.claimed {
            ctx.done(NAME, &device.id, at, json!({"reason": "unclaimed"}));
            return Ok(());
        }
        let mut states = self.states.lock().await;
        let state = self.state_for(&mut states, &device.id).await;
        match self.evaluate(device, state, true).await? {
            Some(suggestion) => self.emit(ctx, device, state, suggestion, at).await,
            None => ctx.done(NAME, &device.id, at, json!({"reason": "no_drift"})),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{Harness, drain};
    use chrono::TimeDelta;
    use std::collections::HashSet;

    #[derive(Default)]
    struct InMemoryModels {
        stored: std::sync::Mutex<HashMap<DeviceId, ScheduleModel>>,
        removed: std::sync::Mutex<HashSet<DeviceId>>,
    }

    #[async_trait]
    impl ModelStore for InMemoryModels {
        async fn load(&self, device_id: &DeviceId) -> Result<Option<ScheduleModel>, HubError> {
            Ok(self.stored.lock().unwrap().get(device_id).cloned())
        }

        async fn save(&self, device_id: &DeviceId, model: &ScheduleModel) -> Result<(), HubError> {
            self.stored
                .lock()
                .unwrap()
                .insert(device_id.clone(), model.clone());
            Ok(())
        }

        async fn remove(&self, device_id: &DeviceId) -> Result<(), HubError> {
            self.stored.lock().unwrap().remove(device_id);
            self.removed.lock().unwrap().insert(device_id.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct InMemoryCsv {
        files: std::sync::Mutex<HashMap<DeviceId, String>>,
    }

    #[async_trait]
    impl ScheduleCsvSource for InMemoryCsv {
        async fn read(&self, device_id: &DeviceId) -> Result<Option<String>, HubError> {
            Ok(self.files.lock().unwrap().get(device_id).cloned())
        }
    }

    // 2024-05-06 is a Monday; on from 08:00 to 10:00
    const MONDAY_MORNING: &str = "timestamp,encendido\n\
        2024-05-06 08:00,1\n\
        2024-05-06 08:30,1\n\
        2024-05-06 09:00,1\n\
        2024-05-06 09:30,1\n\
        2024-05-06 10:00,0\n";

    struct Fixture {
        models: Arc<InMemoryModels>,
        csv: Arc<InMemoryCsv>,
        rule: ScheduleLearnerRule,
    }

    fn fixture(settings: ScheduleSettings) -> Fixture {
        let models = Arc::new(InMemoryModels::default());
        let csv = Arc::new(InMemoryCsv::default());
        let rule = ScheduleLearnerRule::new(settings, models.clone(), csv.clone());
        Fixture { models, csv, rule }
    }

    fn eager() -> ScheduleSettings {
        ScheduleSettings {
            prob_threshold: 0.5,
            cooldown_secs: 0,
            audit_when_scheduled: false,
            ..ScheduleSettings::default()
        }
    }

    fn light() -> Device {
        Device::builder()
            .serial("LGT0001")
            .claimed(true)
            .config("encendido", true)
            .build()
            .unwrap()
    }

    fn scheduled_light(start: &str, end: &str) -> Device {
        Device::builder()
            .serial("LGT0001")
            .claimed(true)
            .config("modo", "horario")
            .config("horarios", json!([{"dias": ["lunes"], "inicio": start, "fin": end}]))
            .build()
            .unwrap()
    }

    fn csv_settings() -> ScheduleSettings {
        ScheduleSettings {
            mask_source: MaskSource::Csv,
            cooldown_secs: 0,
            ..ScheduleSettings::default()
        }
    }

    #[tokio::test]
    async fn should_suggest_learned_schedule_and_save_model() {
        let device = light();
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let f = fixture(eager());

        f.rule
            .on_measure(&harness.ctx, &device, &Signal::Config, now())
            .await
            .unwrap();

        let events = drain(&mut sub);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Suggest);
        assert_eq!(events[0].field("bin_minutes"), Some(&json!(30)));
        assert_eq!(
            events[0].field("suggested_schedule").unwrap()["lunes"],
            json!([{"inicio": "00:00", "fin": "24:00"}])
        );
        assert!(events[0].field("diff_ratio").is_none());
        assert!(f.models.stored.lock().unwrap().contains_key(&device.id));
    }

    #[tokio::test]
    async fn should_not_repeat_identical_suggestion() {
        let device = light();
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let f = fixture(eager());
        let t0 = now();

        for offset in 0..3 {
            f.rule
                .on_measure(&harness.ctx, &device, &Signal::Config, t0 + TimeDelta::seconds(offset))
                .await
                .unwrap();
        }

        assert_eq!(drain(&mut sub).len(), 1);
    }

    #[tokio::test]
    async fn should_wait_for_min_events_and_cooldown() {
        let device = light();
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let f = fixture(ScheduleSettings {
            min_events: 3,
            cooldown_secs: 200,
            suggest_min_diff: 0.0,
            ..eager()
        });
        let t0 = now();

        for offset in [0, 10] {
            f.rule
                .on_measure(&harness.ctx, &device, &Signal::Config, t0 + TimeDelta::seconds(offset))
                .await
                .unwrap();
        }
        assert!(drain(&mut sub).is_empty());

        for offset in [20, 120, 220] {
            f.rule
                .on_measure(&harness.ctx, &device, &Signal::Config, t0 + TimeDelta::seconds(offset))
                .await
                .unwrap();
        }
        assert_eq!(drain(&mut sub).len(), 2);
    }

    #[tokio::test]
    async fn should_stay_silent_without_switch_target() {
        let device = Device::builder()
            .serial("LGT0001")
            .claimed(true)
            .state("desconocido")
            .build()
            .unwrap();
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        // An untrained model predicts 0.5 everywhere, above this threshold.
        let f = fixture(ScheduleSettings {
            prob_threshold: 0.4,
            ..eager()
        });

        f.rule
            .on_measure(&harness.ctx, &device, &Signal::Config, now())
            .await
            .unwrap();

        assert!(drain(&mut sub).is_empty());
        assert!(f.models.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_ignore_signals_other_than_config() {
        let device = light();
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let f = fixture(eager());

        f.rule
            .on_measure(&harness.ctx, &device, &Signal::Heartbeat, now())
            .await
            .unwrap();

        assert!(drain(&mut sub).is_empty());
        assert!(f.models.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_warm_start_from_stored_model() {
        let device = light();
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let f = fixture(ScheduleSettings {
            min_events: 3,
            ..eager()
        });
        let mut stored = ScheduleModel::default();
        let features = TimeFeatures::from_local(harness.ctx.zone.to_local(now()));
        stored.learn(&features, true);
        stored.learn(&features, true);
        f.models
            .stored
            .lock()
            .unwrap()
            .insert(device.id.clone(), stored);

        f.rule
            .on_measure(&harness.ctx, &device, &Signal::Config, now())
            .await
            .unwrap();

        assert_eq!(drain(&mut sub).len(), 1);
        let saved = f.models.stored.lock().unwrap()[&device.id].updates();
        assert_eq!(saved, 3);
    }

    #[tokio::test]
    async fn should_reset_stored_model_once_when_configured() {
        let device = light();
        let harness = Harness::new([device.clone()]);
        let f = fixture(ScheduleSettings {
            reset_on_start: true,
            ..eager()
        });
        f.models
            .stored
            .lock()
            .unwrap()
            .insert(device.id.clone(), ScheduleModel::default());

        f.rule
            .on_measure(&harness.ctx, &device, &Signal::Config, now())
            .await
            .unwrap();

        assert!(f.models.removed.lock().unwrap().contains(&device.id));
        assert_eq!(f.models.stored.lock().unwrap()[&device.id].updates(), 1);
    }

    #[tokio::test]
    async fn should_stay_silent_when_csv_matches_configuration() {
        let device = scheduled_light("08:00", "10:00");
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let f = fixture(csv_settings());
        f.csv
            .files
            .lock()
            .unwrap()
            .insert(device.id.clone(), MONDAY_MORNING.to_string());

        f.rule
            .on_measure(&harness.ctx, &device, &Signal::Config, now())
            .await
            .unwrap();
        assert!(drain(&mut sub).is_empty());

        f.rule
            .run_batch(&harness.ctx, &device, &BatchRequest::for_device(device.id.clone()))
            .await
            .unwrap();
        let events = drain(&mut sub);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Done);
        assert_eq!(events[0].field("reason"), Some(&json!("no_drift")));
    }

    #[tokio::test]
    async fn should_suggest_when_csv_drifts_from_configuration() {
        let device = scheduled_light("14:00", "16:00");
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let f = fixture(csv_settings());
        f.csv
            .files
            .lock()
            .unwrap()
            .insert(device.id.clone(), MONDAY_MORNING.to_string());

        f.rule
            .on_measure(&harness.ctx, &device, &Signal::Config, now())
            .await
            .unwrap();

        let events = drain(&mut sub);
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(
            event.field("suggested_schedule"),
            Some(&json!({"lunes": [{"inicio": "08:00", "fin": "10:00"}]}))
        );
        assert_eq!(
            event.field("current_schedule"),
            Some(&json!({"lunes": [{"inicio": "14:00", "fin": "16:00"}]}))
        );
        assert_eq!(event.field("diff_ratio"), Some(&json!(1.0)));
    }

    #[tokio::test]
    async fn should_skip_device_without_csv_unless_fallback_allowed() {
        let device = light();
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();

        let strict = fixture(ScheduleSettings {
            mask_source: MaskSource::Csv,
            ..eager()
        });
        strict
            .rule
            .on_measure(&harness.ctx, &device, &Signal::Config, now())
            .await
            .unwrap();
        assert!(drain(&mut sub).is_empty());

        let lenient = fixture(ScheduleSettings {
            mask_source: MaskSource::Csv,
            csv_require_file: false,
            ..eager()
        });
        lenient
            .rule
            .on_measure(&harness.ctx, &device, &Signal::Config, now())
            .await
            .unwrap();
        assert_eq!(drain(&mut sub).len(), 1);
    }

    #[tokio::test]
    async fn should_use_model_for_serials_outside_csv_allow_list() {
        let device = light();
        let harness = Harness::new([device.clone()]);
        let mut sub = harness.subscribe();
        let f = fixture(ScheduleSettings {
            mask_source: MaskSource::Csv,
            csv_serials: vec!["LGT0999".to_string()],
            ..eager()
        });

        f.rule
            .on_measure(&harness.ctx, &device, &Signal::Config, now())
            .await
            .unwrap();

        assert_eq!(drain(&mut sub).len(), 1);
    }

    #[tokio::test]
    async fn should_finish_batch_for_unclaimed_device() {
        let harness = Harness::new([]);
        let mut sub = harness.subscribe();
        let f = fixture(eager());
        let device = Device::builder().serial("LGT0002").build().unwrap();

        f.rule
            .run_batch(&harness.ctx, &device, &BatchRequest::for_device(device.id.clone()))
            .await
            .unwrap();

        let events = drain(&mut sub);
        assert_eq!(events[0].field("reason"), Some(&json!("unclaimed")));
    }
}
