use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

/// Failed-login counter per username. After `max_attempts` failures inside
/// `window` the key is locked until the window that started with the first
/// failure runs out.
pub struct LoginThrottle {
    max_attempts: u32,
    window: Duration,
    failures: Mutex<HashMap<String, FailureWindow>>,
}

#[derive(Debug, Clone, Copy)]
struct FailureWindow {
    started: Instant,
    count: u32,
}

impl LoginThrottle {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            window,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// `Err(seconds)` when the key is locked.
    pub fn check(&self, key: &str, now: Instant) -> Result<(), u64> {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let key = normalize(key);
        let Some(window) = failures.get(&key).copied() else {
            return Ok(());
        };
        let elapsed = now.saturating_duration_since(window.started);
        if elapsed >= self.window {
            failures.remove(&key);
            return Ok(());
        }
        if window.count >= self.max_attempts {
            let left = self.window - elapsed;
            let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
            return Err(secs.max(1));
        }
        Ok(())
    }

    /// Also drops every other key whose window has run out.
    pub fn record_failure(&self, key: &str, now: Instant) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.retain(|_, window| now.saturating_duration_since(window.started) < self.window);
        let entry = failures.entry(normalize(key)).or_insert(FailureWindow {
            started: now,
            count: 0,
        });
        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = FailureWindow {
                started: now,
                count: 0,
            };
        }
        entry.count += 1;
    }

    pub fn reset(&self, key: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(&normalize(key));
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn normalize(key: &str) -> String {
    key.trim().to_lowercase()
}
