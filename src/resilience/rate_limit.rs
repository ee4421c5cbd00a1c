//! Fixed-window rate limiting per subject.
//!
//! Each subject (a pool, a webhook subscription, a partner) has a minute, an
//! hour and a day window. A call is admitted only if every window has room,
//! and then all three counters move together.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use serde::Serialize;

use crate::clock::SharedClock;
use crate::config::{RateLimitConfig, WindowLimits};
use crate::observability::metrics;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    window_start: Instant,
}

impl Window {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    /// Reset once if the window boundary was crossed, however long ago.
    fn roll(&mut self, now: Instant, length: Duration) {
        if now.saturating_duration_since(self.window_start) >= length {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn has_room(&self, limit: Option<u32>) -> bool {
        limit.map_or(true, |limit| self.count < limit)
    }
}

/// Minute, hour and day windows in ascending granularity.
#[derive(Debug)]
struct SubjectWindows {
    windows: [Window; 3],
}

impl SubjectWindows {
    fn new(now: Instant) -> Self {
        Self {
            windows: [Window::new(now); 3],
        }
    }

    fn try_acquire(&mut self, now: Instant, limits: &WindowLimits) -> bool {
        let lengths = [MINUTE, HOUR, DAY];
        let limits = [limits.per_minute, limits.per_hour, limits.per_day];

        for (window, length) in self.windows.iter_mut().zip(lengths) {
            window.roll(now, length);
        }
        if !self
            .windows
            .iter()
            .zip(limits)
            .all(|(window, limit)| window.has_room(limit))
        {
            return false;
        }
        for window in &mut self.windows {
            window.count = window.count.saturating_add(1);
        }
        true
    }
}

/// Counts vs limits for one window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowUsage {
    pub count: u32,
    pub limit: Option<u32>,
}

/// Point-in-time usage for one subject.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSnapshot {
    pub minute: WindowUsage,
    pub hour: WindowUsage,
    pub day: WindowUsage,
}

/// Per-subject limiter registry.
#[derive(Debug)]
pub struct RateLimiter {
    subjects: DashMap<String, Arc<Mutex<SubjectWindows>>>,
    config: ArcSwap<RateLimitConfig>,
    clock: SharedClock,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, clock: SharedClock) -> Self {
        Self {
            subjects: DashMap::new(),
            config: ArcSwap::from_pointee(config),
            clock,
        }
    }

    pub fn reconfigure(&self, config: RateLimitConfig) {
        self.config.store(Arc::new(config));
    }

    fn windows(&self, subject: &str, now: Instant) -> Arc<Mutex<SubjectWindows>> {
        if let Some(entry) = self.subjects.get(subject) {
            return entry.value().clone();
        }
        self.subjects
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(SubjectWindows::new(now))))
            .value()
            .clone()
    }

    /// Admit or reject one call for `subject`.
    pub fn try_acquire(&self, subject: &str) -> bool {
        let config = self.config.load();
        if !config.enabled {
            return true;
        }

        let limits = config.limits_for(subject);
        let now = self.clock.now();
        let windows = self.windows(subject, now);
        let admitted = windows
            .lock()
            .expect("rate limiter mutex poisoned")
            .try_acquire(now, &limits);

        if !admitted {
            tracing::warn!(subject = %subject, "Rate limit exceeded");
            metrics::record_rate_limited(subject);
        }
        admitted
    }

    /// Usage for every subject seen so far, keyed by subject.
    pub fn snapshot(&self) -> BTreeMap<String, RateLimitSnapshot> {
        let config = self.config.load();
        let now = self.clock.now();
        self.subjects
            .iter()
            .map(|entry| {
                let limits = config.limits_for(entry.key());
                let mut windows = entry.value().lock().expect("rate limiter mutex poisoned");
                for (window, length) in windows.windows.iter_mut().zip([MINUTE, HOUR, DAY]) {
                    window.roll(now, length);
                }
                let [minute, hour, day] = windows.windows;
                let usage = RateLimitSnapshot {
                    minute: WindowUsage { count: minute.count, limit: limits.per_minute },
                    hour: WindowUsage { count: hour.count, limit: limits.per_hour },
                    day: WindowUsage { count: day.count, limit: limits.per_day },
                };
                (entry.key().clone(), usage)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limiter(limits: WindowLimits) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let config = RateLimitConfig {
            enabled: true,
            default: limits,
            subjects: HashMap::new(),
        };
        (RateLimiter::new(config, Arc::new(clock.clone())), clock)
    }

    #[test]
    fn test_per_minute_window() {
        let (rl, clock) = limiter(WindowLimits {
            per_minute: Some(2),
            per_hour: None,
            per_day: None,
        });

        assert!(rl.try_acquire("s"));
        assert!(rl.try_acquire("s"));
        assert!(!rl.try_acquire("s"));

        clock.advance(Duration::from_secs(60));
        assert!(rl.try_acquire("s"));
    }

    #[test]
    fn test_rejected_call_is_not_counted() {
        let (rl, _clock) = limiter(WindowLimits {
            per_minute: Some(1),
            per_hour: Some(10),
            per_day: None,
        });

        assert!(rl.try_acquire("s"));
        assert!(!rl.try_acquire("s"));
        assert!(!rl.try_acquire("s"));

        let snap = rl.snapshot();
        assert_eq!(snap["s"].minute.count, 1);
        assert_eq!(snap["s"].hour.count, 1);
    }

    #[test]
    fn test_hour_window_blocks_after_minutes_roll() {
        let (rl, clock) = limiter(WindowLimits {
            per_minute: Some(2),
            per_hour: Some(3),
            per_day: None,
        });

        assert!(rl.try_acquire("s"));
        assert!(rl.try_acquire("s"));
        clock.advance(Duration::from_secs(61));
        assert!(rl.try_acquire("s"));
        assert!(!rl.try_acquire("s"));

        clock.advance(Duration::from_secs(60 * 60));
        assert!(rl.try_acquire("s"));
    }

    #[test]
    fn test_long_idle_resets_once() {
        let (rl, clock) = limiter(WindowLimits {
            per_minute: Some(1),
            per_hour: None,
            per_day: None,
        });
        assert!(rl.try_acquire("s"));
        clock.advance(Duration::from_secs(60 * 17 + 5));
        assert!(rl.try_acquire("s"));
        assert!(!rl.try_acquire("s"));
    }

    #[test]
    fn test_subjects_are_independent_and_overridable() {
        let clock = ManualClock::new();
        let mut subjects = HashMap::new();
        subjects.insert(
            "vip".to_string(),
            WindowLimits { per_minute: Some(3), per_hour: None, per_day: None },
        );
        let rl = RateLimiter::new(
            RateLimitConfig {
                enabled: true,
                default: WindowLimits { per_minute: Some(1), per_hour: None, per_day: None },
                subjects,
            },
            Arc::new(clock),
        );

        assert!(rl.try_acquire("a"));
        assert!(!rl.try_acquire("a"));
        assert!(rl.try_acquire("b"));
        for _ in 0..3 {
            assert!(rl.try_acquire("vip"));
        }
        assert!(!rl.try_acquire("vip"));
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let (rl, _clock) = limiter(WindowLimits {
            per_minute: None,
            per_hour: None,
            per_day: Some(0),
        });
        assert!(!rl.try_acquire("s"));
    }

    #[test]
    fn test_concurrent_acquires_never_exceed_limit() {
        let (rl, _clock) = limiter(WindowLimits {
            per_minute: Some(50),
            per_hour: None,
            per_day: None,
        });
        let admitted = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        if rl.try_acquire("shared") {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(admitted.load(Ordering::SeqCst), 50);
        assert_eq!(rl.snapshot()["shared"].minute.count, 50);
    }

    #[test]
    fn test_disabled_limiter_admits_all() {
        let clock = ManualClock::new();
        let rl = RateLimiter::new(
            RateLimitConfig {
                enabled: false,
                default: WindowLimits { per_minute: Some(0), per_hour: None, per_day: None },
                subjects: HashMap::new(),
            },
            Arc::new(clock),
        );
        assert!(rl.try_acquire("s"));
    }
}
