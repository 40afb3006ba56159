//! Weather service: current conditions with caching and operator injection.
//!
//! Priority: an injected payload that has not expired, then a cached provider
//! snapshot younger than the cache TTL, then a live fetch. When the fetch
//! fails the last cached snapshot is served as `stale-cache`.

use std::sync::{Arc, Mutex};

use chrono::TimeDelta;
use serde::Serialize;
use serde_json::{Map, Value};

use hubwatch_domain::time::{Timestamp, elapsed_secs, now};
use hubwatch_domain::weather::WeatherSnapshot;

use crate::error::WeatherError;
use crate::ports::WeatherProvider;
use crate::sync::lock;

/// Source label of injected snapshots.
pub const SOURCE_INJECTED: &str = "injected";
/// Source label of fresh cached snapshots.
pub const SOURCE_CACHE: &str = "cache";
/// Source label of a cached snapshot served after a failed fetch.
pub const SOURCE_STALE: &str = "stale-cache";

/// A snapshot and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReading {
    /// Canonical conditions.
    pub snapshot: WeatherSnapshot,
    /// `injected`, `cache`, `stale-cache`, or the provider name.
    pub source: String,
    /// When the snapshot was produced.
    pub fetched_at: Timestamp,
    /// Fetch failure that forced a stale snapshot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone)]
struct Cached {
    snapshot: WeatherSnapshot,
    fetched_at: Timestamp,
}

#[derive(Clone)]
struct Injected {
    snapshot: WeatherSnapshot,
    injected_at: Timestamp,
    expires_at: Timestamp,
}

/// Application service serving the current weather snapshot.
pub struct WeatherService {
    provider: Arc<dyn WeatherProvider>,
    cache_ttl_secs: u64,
    cache: Mutex<Option<Cached>>,
    injected: Mutex<Option<Injected>>,
}

impl WeatherService {
    /// Create a service over the given provider.
    pub fn new(provider: Arc<dyn WeatherProvider>, cache_ttl_secs: u64) -> Self {
        Self {
            provider,
            cache_ttl_secs,
            cache: Mutex::new(None),
            injected: Mutex::new(None),
        }
    }

    /// The current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`WeatherError::Unavailable`] when the provider fails and
    /// nothing was cached yet.
    #[tracing::instrument(skip(self))]
    pub async fn current(&self) -> Result<WeatherReading, WeatherError> {
        let at = now();
        if let Some(reading) = self.injected_reading(at) {
            return Ok(reading);
        }
        let cached = lock(&self.cache).clone();
        if let Some(cached) = &cached
            && elapsed_secs(cached.fetched_at, at) < self.cache_ttl_secs
        {
            return Ok(reading(cached, SOURCE_CACHE, None));
        }

        match self.provider.fetch().await {
            Ok(raw) => {
                let fresh = Cached {
                    snapshot: WeatherSnapshot::from_payload(&raw),
                    fetched_at: now(),
                };
                *lock(&self.cache) = Some(fresh.clone());
                Ok(reading(&fresh, self.provider.name(), None))
            }
            Err(err) => {
                tracing::warn!(%err, provider = self.provider.name(), "weather fetch failed");
                cached
                    .map(|cached| reading(&cached, SOURCE_STALE, Some(err.to_string())))
                    .ok_or(WeatherError::Unavailable)
            }
        }
    }

    /// Override the provider with `payload` for `ttl_secs` (at least one
    /// second). An empty payload clears any injection.
    pub fn inject(&self, payload: &Map<String, Value>, ttl_secs: u64) {
        if payload.is_empty() {
            self.clear_injection();
            return;
        }
        let at = now();
        let ttl = i64::try_from(ttl_secs.max(1)).unwrap_or(i64::MAX);
        let expires_at = at
            .checked_add_signed(TimeDelta::seconds(ttl))
            .unwrap_or(Timestamp::MAX_UTC);
        *lock(&self.injected) = Some(Injected {
            snapshot: WeatherSnapshot::from_payload(payload),
            injected_at: at,
            expires_at,
        });
        tracing::info!(ttl_secs, "weather snapshot injected");
    }

    /// Drop any injected snapshot.
    pub fn clear_injection(&self) {
        if lock(&self.injected).take().is_some() {
            tracing::info!("weather injection cleared");
        }
    }

    fn injected_reading(&self, at: Timestamp) -> Option<WeatherReading> {
        let mut injected = lock(&self.injected);
        match injected.as_ref() {
            Some(current) if at < current.expires_at => Some(WeatherReading {
                snapshot: current.snapshot.clone(),
                source: SOURCE_INJECTED.to_string(),
                fetched_at: current.injected_at,
                error: None,
            }),
            Some(_) => {
                *injected = None;
                None
            }
            None => None,
        }
    }
}

fn reading(cached: &Cached, source: &str, error: Option<String>) -> WeatherReading {
    WeatherReading {
        snapshot: cached.snapshot.clone(),
        source: source.to_string(),
        fetched_at: cached.fetched_at,
        error,
    }
}
