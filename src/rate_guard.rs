//! Fixed-window request counter per caller identity.
//!
//! Each identity gets a window that opens on its first call and admits at
//! most `limit` calls until `window` has elapsed. The table of windows is an
//! LRU cache: when it is full, the least recently used identity is evicted.
//! Expired windows are dropped by the periodic [`RateGuard::sweep_expired`].

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;
use tracing::{debug, warn};

use crate::config;
use crate::error::{CustodyError, Result};

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { origin: Instant::now(), offset: Mutex::new(Duration::ZERO) }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Throttled { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// No live window; the next call opens one.
    Fresh,
    Active,
    Throttled,
}

struct RateWindow {
    count: u32,
    window_start: Instant,
}

impl RateWindow {
    fn open(now: Instant) -> Self {
        Self { count: 1, window_start: now }
    }

    fn expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }

    fn record(&mut self, now: Instant, limit: u32, window: Duration) -> RateDecision {
        if self.expired(now, window) {
            self.window_start = now;
            self.count = 1;
            return RateDecision::Allowed;
        }
        self.count = self.count.saturating_add(1);
        if self.count > limit {
            let elapsed = now.saturating_duration_since(self.window_start);
            RateDecision::Throttled { retry_after: window.saturating_sub(elapsed) }
        } else {
            RateDecision::Allowed
        }
    }
}

pub struct RateGuard {
    limit: u32,
    window: Duration,
    max_identities: NonZeroUsize,
    clock: Arc<dyn Clock>,
    windows: Mutex<LruCache<String, RateWindow>>,
}

impl RateGuard {
    pub fn new(cfg: &config::RateLimit) -> Self {
        Self::with_clock(cfg, Arc::new(MonotonicClock))
    }

    pub fn with_clock(cfg: &config::RateLimit, clock: Arc<dyn Clock>) -> Self {
        let max_identities = NonZeroUsize::new(cfg.max_identities).unwrap_or(NonZeroUsize::MIN);
        Self {
            limit: cfg.limit.max(1),
            window: cfg.window(),
            max_identities,
            clock,
            windows: Mutex::new(LruCache::new(max_identities)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, RateWindow>> {
        // Counters stay meaningful even if a holder panicked mid-update.
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one call from `identity` and decide whether it may proceed.
    /// Check and increment happen under one lock, and the lookup marks the
    /// identity as most recently used.
    pub fn check(&self, identity: &str) -> RateDecision {
        let now = self.clock.now();
        let mut windows = self.lock();
        if let Some(window) = windows.get_mut(identity) {
            let decision = window.record(now, self.limit, self.window);
            if !decision.is_allowed() {
                warn!(identity, count = window.count, "rate limit exceeded");
            }
            return decision;
        }
        if let Some((evicted, _)) = windows.push(identity.to_owned(), RateWindow::open(now)) {
            debug!(identity = %evicted, "evicting least recently used rate window");
        }
        RateDecision::Allowed
    }

    /// Like [`check`](Self::check), but a throttled call becomes an error.
    pub fn enforce(&self, identity: &str) -> Result<()> {
        match self.check(identity) {
            RateDecision::Allowed => Ok(()),
            RateDecision::Throttled { retry_after } => Err(CustodyError::RateLimitExceeded {
                identity: identity.to_owned(),
                retry_after,
            }),
        }
    }

    pub fn state(&self, identity: &str) -> Option<WindowState> {
        let now = self.clock.now();
        let windows = self.lock();
        // peek leaves recency alone; only calls count as use
        let window = windows.peek(identity)?;
        Some(if window.expired(now, self.window) {
            WindowState::Fresh
        } else if window.count > self.limit {
            WindowState::Throttled
        } else {
            WindowState::Active
        })
    }

    /// Drop every expired window. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.lock();
        let expired: Vec<String> = windows
            .iter()
            .filter(|(_, w)| w.expired(now, self.window))
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in &expired {
            windows.pop(identity);
        }
        if !expired.is_empty() {
            debug!(swept = expired.len(), "swept expired rate windows");
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

impl std::fmt::Debug for RateGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGuard")
            .field("limit", &self.limit)
            .field("window", &self.window)
            .field("max_identities", &self.max_identities)
            .finish_non_exhaustive()
    }
}
