//! Tag-based cooldown timestamps.

use std::collections::HashMap;

/// Expiry time per cooldown tag, in component time (seconds since start).
#[derive(Debug, Clone, Default)]
pub struct CooldownMap {
    ends: HashMap<String, f64>,
}

impl CooldownMap {
    /// End time of `tag`'s cooldown, or `0.0` if it never started.
    pub fn end_time(&self, tag: &str) -> f64 {
        self.ends.get(tag).copied().unwrap_or(0.0)
    }

    pub fn is_cooling_down(&self, tag: &str, now: f64) -> bool {
        self.end_time(tag) > now
    }

    /// Extends an existing cooldown by `duration` when `add_to_existing`,
    /// otherwise sets it to end `duration` seconds after `now`.
    pub fn add_duration(&mut self, tag: &str, duration: f64, add_to_existing: bool, now: f64) {
        if tag.is_empty() {
            return;
        }
        match self.ends.get_mut(tag) {
            Some(end) if add_to_existing => *end += duration,
            _ => {
                self.ends.insert(tag.to_string(), now + duration);
            }
        }
    }
}
