//! # limiter: download rate limiting
//!
//! The service only needs "may this client download now?" and "count one
//! more download for this client". Both sit behind the [`RateLimiter`] trait so
//! a shared backend can replace the in-process [`InMemoryRateLimiter`].
//!
//! Callers treat every `Err` as a backend outage and fall back to allowing the
//! download; see the HTTP handlers.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;
use serde::Serialize;

/// Error type for collaborator backends (simple boxed error)
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a rate check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Downloads left in the current window
    pub remaining: u32,
}

/// Counter keyed by client identifier over a rolling time window.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Whether `key` may perform one more download right now.
    async fn can_proceed(&self, key: &str) -> Result<RateDecision, BackendError>;

    /// Count one download for `key`.
    async fn record(&self, key: &str) -> Result<(), BackendError>;

    /// Check and count in one step; `remaining` is what is left afterwards.
    ///
    /// The default runs [`can_proceed`](Self::can_proceed) then
    /// [`record`](Self::record), which two concurrent callers can interleave.
    /// Backends that can do both atomically should override it.
    async fn consume(&self, key: &str) -> Result<RateDecision, BackendError> {
        let decision = self.can_proceed(key).await?;
        if !decision.allowed {
            return Ok(decision);
        }
        self.record(key).await?;
        Ok(RateDecision {
            allowed: true,
            remaining: decision.remaining.saturating_sub(1),
        })
    }

    /// Downloads allowed per window; reported as `remaining` when the backend is down.
    fn limit(&self) -> u32;
}

/// Sliding-window limiter kept in process memory
pub struct InMemoryRateLimiter {
    max_requests: u32,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl InMemoryRateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, VecDeque<Instant>>>, BackendError> {
        self.hits
            .lock()
            .map_err(|e| -> BackendError { format!("rate limiter lock poisoned: {}", e).into() })
    }

    /// Hits for `key` still inside the window, after dropping expired ones
    fn prune<'a>(
        &self,
        hits: &'a mut HashMap<String, VecDeque<Instant>>,
        key: &str,
        now: Instant,
    ) -> &'a mut VecDeque<Instant> {
        let entries = hits.entry(key.to_string()).or_default();
        while entries
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            entries.pop_front();
        }
        entries
    }

    fn used(&self, key: &str, now: Instant) -> Result<u32, BackendError> {
        let mut hits = self.lock()?;
        let used = self.prune(&mut hits, key, now).len() as u32;
        if used == 0 {
            hits.remove(key);
        }
        Ok(used)
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn can_proceed(&self, key: &str) -> Result<RateDecision, BackendError> {
        let used = self.used(key, Instant::now())?;
        Ok(RateDecision {
            allowed: used < self.max_requests,
            remaining: self.max_requests.saturating_sub(used),
        })
    }

    async fn record(&self, key: &str) -> Result<(), BackendError> {
        let mut hits = self.lock()?;
        hits.entry(key.to_string())
            .or_default()
            .push_back(Instant::now());
        Ok(())
    }

    async fn consume(&self, key: &str) -> Result<RateDecision, BackendError> {
        let now = Instant::now();
        let mut hits = self.lock()?;
        let entries = self.prune(&mut hits, key, now);
        let used = entries.len() as u32;
        if used >= self.max_requests {
            return Ok(RateDecision {
                allowed: false,
                remaining: 0,
            });
        }
        entries.push_back(now);
        Ok(RateDecision {
            allowed: true,
            remaining: self.max_requests - used - 1,
        })
    }

    fn limit(&self) -> u32 {
        self.max_requests
    }
}
