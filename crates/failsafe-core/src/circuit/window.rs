//! Rolling outcome window
//!
//! Holds the most recent execution outcomes a breaker bases its failure rate
//! on, bounded either by count or by age.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bound on the outcomes a breaker remembers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum RollingWindow {
    /// The last `size` outcomes
    Count { size: u32 },

    /// Outcomes recorded within the last `duration`
    Time {
        #[serde(rename = "duration-ms", with = "millis")]
        duration: Duration,
    },
}

impl Default for RollingWindow {
    fn default() -> Self {
        RollingWindow::Count { size: 10 }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug)]
pub(crate) struct OutcomeWindow {
    bound: RollingWindow,
    /// (recorded at, succeeded)
    entries: VecDeque<(Instant, bool)>,
}

impl OutcomeWindow {
    pub(crate) fn new(bound: RollingWindow) -> Self {
        let capacity = match bound {
            RollingWindow::Count { size } => size as usize,
            RollingWindow::Time { .. } => 16,
        };
        Self {
            bound,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub(crate) fn record(&mut self, now: Instant, succeeded: bool) {
        self.entries.push_back((now, succeeded));
        self.evict(now);
    }

    /// (successes, failures) currently inside the window
    pub(crate) fn counts(&mut self, now: Instant) -> (u32, u32) {
        self.evict(now);
        let successes = self.entries.iter().filter(|(_, ok)| *ok).count() as u32;
        (successes, self.entries.len() as u32 - successes)
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    fn evict(&mut self, now: Instant) {
        match self.bound {
            RollingWindow::Count { size } => {
                while self.entries.len() > size as usize {
                    self.entries.pop_front();
                }
            }
            RollingWindow::Time { duration } => {
                while let Some((at, _)) = self.entries.front() {
                    if now.saturating_duration_since(*at) > duration {
                        self.entries.pop_front();
                    } else {
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_window_keeps_latest() {
        let now = Instant::now();
        let mut window = OutcomeWindow::new(RollingWindow::Count { size: 3 });
        window.record(now, false);
        window.record(now, false);
        window.record(now, true);
        window.record(now, true);

        assert_eq!(window.counts(now), (2, 1));
    }

    #[test]
    fn test_time_window_expires_old_outcomes() {
        let start = Instant::now();
        let mut window = OutcomeWindow::new(RollingWindow::Time {
            duration: Duration::from_secs(10),
        });
        window.record(start, false);
        window.record(start + Duration::from_secs(5), true);

        assert_eq!(window.counts(start + Duration::from_secs(10)), (1, 1));
        assert_eq!(window.counts(start + Duration::from_secs(11)), (1, 0));
        assert_eq!(window.counts(start + Duration::from_secs(16)), (0, 0));
    }

    #[test]
    fn test_clear() {
        let now = Instant::now();
        let mut window = OutcomeWindow::new(RollingWindow::default());
        window.record(now, false);
        window.clear();
        assert_eq!(window.counts(now), (0, 0));
    }

    #[test]
    fn test_window_yaml_shape() {
        let window: RollingWindow =
            serde_yaml_ng::from_str("kind: time\nduration-ms: 1500").unwrap();
        assert_eq!(
            window,
            RollingWindow::Time {
                duration: Duration::from_millis(1500)
            }
        );

        let window: RollingWindow = serde_yaml_ng::from_str("kind: count\nsize: 4").unwrap();
        assert_eq!(window, RollingWindow::Count { size: 4 });
    }
}
