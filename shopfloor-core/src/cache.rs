//! Memoized, rate-limited, retrying front for a `GenerationBackend`
//!
//! `GenerationCache::generate` never fails: callers get generated text or
//! `FALLBACK_MESSAGE`. Only successful generations are stored.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio_retry::Retry;

use crate::config::GenerationConfig;
use crate::generation::{GenerationBackend, GenerationError, GenerationOptions};
use crate::rate_limit::RateLimiter;

pub const FALLBACK_MESSAGE: &str = "Sorry, the AI service is currently unavailable. Please try again later or switch to local mode.";

pub fn is_fallback(text: &str) -> bool {
    text == FALLBACK_MESSAGE
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub capacity: usize,
    pub max_retries: usize,
    /// Delay before the second attempt; doubles after each further failure.
    pub retry_base_delay: Duration,
    pub attempt_timeout: Duration,
    pub options: GenerationOptions,
}

impl CacheSettings {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            capacity: config.cache_capacity,
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_millis(config.retry_base_delay_ms),
            attempt_timeout: Duration::from_secs(config.request_timeout_seconds.max(1)),
            options: GenerationOptions::from_config(config),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_config(&GenerationConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fallbacks: u64,
    pub entries: usize,
    pub capacity: usize,
}

/// Prompt -> text entries with least-recently-used eviction.
#[derive(Debug)]
struct LruEntries {
    map: HashMap<String, (String, u64)>,
    tick: u64,
    capacity: usize,
}

impl LruEntries {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::with_capacity(capacity),
            tick: 0,
            capacity,
        }
    }

    fn get(&mut self, key: &str) -> Option<String> {
        self.tick += 1;
        let tick = self.tick;
        self.map.get_mut(key).map(|(value, last_used)| {
            *last_used = tick;
            value.clone()
        })
    }

    fn insert(&mut self, key: String, value: String) {
        if self.capacity == 0 {
            return;
        }
        self.tick += 1;

        if !self.map.contains_key(&key) && self.map.len() >= self.capacity {
            let oldest = self
                .map
                .iter()
                .min_by_key(|(_, (_, last_used))| *last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                self.map.remove(&oldest);
            }
        }

        self.map.insert(key, (value, self.tick));
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

pub struct GenerationCache {
    backend: Arc<dyn GenerationBackend>,
    limiter: Arc<RateLimiter>,
    settings: CacheSettings,
    entries: Mutex<LruEntries>,
    hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
}

impl GenerationCache {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        limiter: Arc<RateLimiter>,
        settings: CacheSettings,
    ) -> Self {
        Self {
            entries: Mutex::new(LruEntries::new(settings.capacity)),
            backend,
            limiter,
            settings,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
        }
    }

    pub fn from_config(
        backend: Arc<dyn GenerationBackend>,
        limiter: Arc<RateLimiter>,
        config: &GenerationConfig,
    ) -> Self {
        Self::new(backend, limiter, CacheSettings::from_config(config))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn generate(&self, prompt: &str) -> String {
        self.generate_with_retries(prompt, self.settings.max_retries)
            .await
    }

    pub async fn generate_with_retries(&self, prompt: &str, max_retries: usize) -> String {
        let cached = self.entries.lock().get(prompt);
        if let Some(text) = cached {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(prompt_chars = prompt.len(), "Generation cache hit");
            return text;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        if !self.limiter.try_acquire() {
            tracing::warn!(
                max_requests = self.limiter.max_requests(),
                window_secs = self.limiter.window().as_secs(),
                "Generation rate limit reached, returning fallback"
            );
            return self.fallback();
        }

        let attempts = max_retries.max(1);
        let base = self.settings.retry_base_delay;
        let strategy = (0..attempts as u32 - 1).map(move |k| base.saturating_mul(2u32.saturating_pow(k)));
        let attempt_no = AtomicUsize::new(0);

        let result = Retry::spawn(strategy, || {
            let n = attempt_no.fetch_add(1, Ordering::Relaxed) + 1;
            self.attempt(prompt, n)
        })
        .await;

        match result {
            Ok(text) => {
                self.entries.lock().insert(prompt.to_string(), text.clone());
                text
            }
            Err(e) => {
                tracing::error!(
                    backend = self.backend.name(),
                    attempts,
                    error = %e,
                    "All generation attempts failed"
                );
                self.fallback()
            }
        }
    }

    async fn attempt(&self, prompt: &str, n: usize) -> Result<String, GenerationError> {
        let timeout = self.settings.attempt_timeout;
        let result = match tokio::time::timeout(
            timeout,
            self.backend.generate(prompt, &self.settings.options),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GenerationError::Timeout(timeout)),
        };

        if let Err(e) = &result {
            tracing::warn!(backend = self.backend.name(), attempt = n, error = %e, "Generation attempt failed");
        }
        result
    }

    fn fallback(&self) -> String {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        FALLBACK_MESSAGE.to_string()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            entries: self.entries.lock().len(),
            capacity: self.settings.capacity,
        }
    }
}
