//! Stepped counter transitions.
//!
//! Each counter owns a `watch` channel holding its displayed value. Starting
//! an animation cancels the previous one for that counter through its
//! [`CancellationToken`], so at most one task ever writes a counter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::DashboardStats;

pub const STAT_TOTAL: &str = "stat_total";
pub const STAT_IPS: &str = "stat_ips";
pub const STAT_COUNTRIES: &str = "stat_countries";
pub const STAT_FAILED: &str = "stat_failed";

#[derive(Debug, Clone, Copy)]
pub struct AnimationSettings {
    pub duration: Duration,
    pub steps: u32,
}

impl Default for AnimationSettings {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(500),
            steps: 30,
        }
    }
}

/// Values shown after each step. Intermediate values are rounded; the last
/// one is exactly `to`.
pub fn frames(from: u64, to: u64, steps: u32) -> Vec<u64> {
    if steps == 0 {
        return vec![to];
    }
    let increment = (to as f64 - from as f64) / f64::from(steps);
    (1..=steps)
        .map(|step| {
            if step == steps {
                to
            } else {
                (from as f64 + increment * f64::from(step)).round().max(0.0) as u64
            }
        })
        .collect()
}

struct Counter {
    value: Arc<watch::Sender<u64>>,
    running: Option<CancellationToken>,
}

impl Counter {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            value: Arc::new(tx),
            running: None,
        }
    }
}

pub struct StatsAnimator {
    settings: AnimationSettings,
    counters: HashMap<String, Counter>,
}

impl StatsAnimator {
    pub fn new(settings: AnimationSettings) -> Self {
        Self {
            settings,
            counters: HashMap::new(),
        }
    }

    /// Move `counter` from its displayed value to `target`.
    ///
    /// Outside a tokio runtime the counter snaps straight to `target`.
    pub fn animate_to(&mut self, counter: &str, target: u64) {
        let entry = self
            .counters
            .entry(counter.to_string())
            .or_insert_with(Counter::new);

        if let Some(previous) = entry.running.take() {
            previous.cancel();
        }

        let from = *entry.value.borrow();
        let handle = tokio::runtime::Handle::try_current();
        if from == target || handle.is_err() || self.settings.steps == 0 {
            entry.value.send_replace(target);
            return;
        }

        let token = CancellationToken::new();
        entry.running = Some(token.clone());

        let value = entry.value.clone();
        let steps = frames(from, target, self.settings.steps);
        let period = (self.settings.duration / self.settings.steps).max(Duration::from_millis(1));
        trace!(counter, from, target, "counter animation started");

        if let Ok(handle) = handle {
            handle.spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                for step in steps {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return,
                        _ = ticker.tick() => {
                            value.send_replace(step);
                        }
                    }
                }
            });
        }
    }

    /// Drive the four headline counters.
    pub fn animate_stats(&mut self, stats: &DashboardStats) {
        self.animate_to(STAT_TOTAL, stats.total);
        self.animate_to(STAT_IPS, stats.unique_ips);
        self.animate_to(STAT_COUNTRIES, stats.countries);
        self.animate_to(STAT_FAILED, stats.failed_total);
    }

    pub fn displayed(&self, counter: &str) -> u64 {
        self.counters
            .get(counter)
            .map(|c| *c.value.borrow())
            .unwrap_or(0)
    }

    pub fn subscribe(&mut self, counter: &str) -> watch::Receiver<u64> {
        self.counters
            .entry(counter.to_string())
            .or_insert_with(Counter::new)
            .value
            .subscribe()
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|(name, c)| (name.clone(), *c.value.borrow()))
            .collect()
    }
}

impl Drop for StatsAnimator {
    fn drop(&mut self) {
        for counter in self.counters.values_mut() {
            if let Some(token) = counter.running.take() {
                token.cancel();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_snap_to_target() {
        let f = frames(0, 100, 30);
        assert_eq!(f.len(), 30);
        assert_eq!(f[0], 3);
        assert_eq!(*f.last().unwrap(), 100);
        assert!(f.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_frames_count_down() {
        let f = frames(10, 7, 3);
        assert_eq!(f, vec![9, 8, 7]);
    }

    #[test]
    fn test_frames_zero_steps() {
        assert_eq!(frames(4, 9, 0), vec![9]);
    }

    #[test]
    fn test_snaps_without_runtime() {
        let mut animator = StatsAnimator::new(AnimationSettings::default());
        animator.animate_to(STAT_TOTAL, 42);
        assert_eq!(animator.displayed(STAT_TOTAL), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_target_after_duration() {
        let mut animator = StatsAnimator::new(AnimationSettings::default());
        animator.animate_to(STAT_TOTAL, 1000);
        assert_eq!(animator.displayed(STAT_TOTAL), 0);

        tokio::time::sleep(Duration::from_millis(250)).await;
        let midway = animator.displayed(STAT_TOTAL);
        assert!(midway > 0 && midway < 1000, "midway value {}", midway);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(animator.displayed(STAT_TOTAL), 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_animation_replaces_running_one() {
        let mut animator = StatsAnimator::new(AnimationSettings::default());
        animator.animate_to(STAT_IPS, 100);
        tokio::time::sleep(Duration::from_millis(200)).await;

        animator.animate_to(STAT_IPS, 10);
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(animator.displayed(STAT_IPS), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_animation_writes_no_more_frames() {
        let mut animator = StatsAnimator::new(AnimationSettings::default());
        let mut rx = animator.subscribe(STAT_TOTAL);
        animator.animate_to(STAT_TOTAL, 1000);
        tokio::time::sleep(Duration::from_millis(100)).await;

        // settle where it is: cancels the running task without starting one
        let held = animator.displayed(STAT_TOTAL);
        assert!(held > 0 && held < 1000);
        animator.animate_to(STAT_TOTAL, held);
        rx.borrow_and_update();

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!rx.has_changed().unwrap());
        assert_eq!(animator.displayed(STAT_TOTAL), held);
    }

    #[tokio::test(start_paused = true)]
    async fn test_animate_stats_drives_all_counters() {
        let mut animator = StatsAnimator::new(AnimationSettings::default());
        let mut rx = animator.subscribe(STAT_FAILED);
        animator.animate_stats(&DashboardStats {
            total: 30,
            unique_ips: 3,
            countries: 2,
            failed_total: 12,
        });
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 12);
        let shown = animator.snapshot();
        assert_eq!(shown[STAT_TOTAL], 30);
        assert_eq!(shown[STAT_IPS], 3);
        assert_eq!(shown[STAT_COUNTRIES], 2);
    }
}
