//! Shared state between the foreground display loop and the background
//! coordinator.
//!
//! One mutex guards the whole thing. The lock is only ever held long
//! enough to copy or replace the snapshot and flags - never across
//! network calls, filesystem work, or sleeps.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Readings for a single hive, in display order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HiveRecord {
    pub id: String,
    pub temperature: Vec<(String, String)>,
    pub humidity: Vec<(String, String)>,
    pub weight: Option<String>,
}

/// One wholesale-replaced fetch result. Never mutated in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorSnapshot {
    pub hives: Vec<HiveRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The full duration elapsed.
    Completed,
    /// The pause flag flipped mid-wait.
    Interrupted,
    /// Stop was requested; the caller should exit.
    Stopped,
}

#[derive(Default)]
struct Inner {
    snapshot: SensorSnapshot,
    fresh: bool,
    paused: bool,
    stop: bool,
    update_ready: bool,
}

/// The single coordination object shared by both flows.
pub struct SharedDisplayState {
    inner: Mutex<Inner>,
    // Woken on pause/stop changes so waits react within a slice even if
    // the slice sleep has just begun.
    signal: Condvar,
}

/// Waits are chunked so pause and stop take effect within one slice
/// rather than after a full sleep interval.
const WAIT_SLICE: Duration = Duration::from_secs(1);

impl SharedDisplayState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            signal: Condvar::new(),
        })
    }

    /// Replaces the held snapshot atomically and marks it fresh.
    pub fn publish(&self, snapshot: SensorSnapshot) {
        let mut inner = self.inner.lock().unwrap();
        inner.snapshot = snapshot;
        inner.fresh = true;
    }

    /// Returns a copy of the current snapshot. The lock is released
    /// before the caller processes the data.
    pub fn consume(&self) -> SensorSnapshot {
        self.inner.lock().unwrap().snapshot.clone()
    }

    /// Reads and clears the freshness flag so one publish is observed as
    /// fresh exactly once.
    pub fn take_fresh(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        std::mem::take(&mut inner.fresh)
    }

    /// The foreground owns the device while paused; the coordinator skips
    /// all network and OTA work.
    pub fn set_paused(&self, paused: bool) {
        self.inner.lock().unwrap().paused = paused;
        self.signal.notify_all();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().unwrap().paused
    }

    /// Cooperative cancellation; the coordinator exits within one slice.
    pub fn request_stop(&self) {
        self.inner.lock().unwrap().stop = true;
        self.signal.notify_all();
    }

    pub fn should_stop(&self) -> bool {
        self.inner.lock().unwrap().stop
    }

    /// Set when a verified update has been staged and a reboot will apply it.
    pub fn set_update_ready(&self, ready: bool) {
        self.inner.lock().unwrap().update_ready = ready;
    }

    pub fn update_ready(&self) -> bool {
        self.inner.lock().unwrap().update_ready
    }

    /// Sleeps for `total` in bounded slices, returning early when stop is
    /// requested or the pause flag changes. This is the only wait
    /// primitive the coordinator uses.
    pub fn wait(&self, total: Duration) -> WaitOutcome {
        let started = Instant::now();
        let paused_at_entry = self.is_paused();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= total {
                return WaitOutcome::Completed;
            }
            let slice = WAIT_SLICE.min(total - elapsed);
            let inner = self.inner.lock().unwrap();
            let (inner, _timeout) = self
                .signal
                .wait_timeout(inner, slice)
                .unwrap();
            if inner.stop {
                return WaitOutcome::Stopped;
            }
            if inner.paused != paused_at_entry {
                return WaitOutcome::Interrupted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn snapshot(tag: &str, n: usize) -> SensorSnapshot {
        SensorSnapshot {
            hives: (0..n)
                .map(|i| HiveRecord {
                    id: format!("{tag}-{i}"),
                    temperature: vec![("Brood".to_string(), tag.to_string())],
                    humidity: vec![("Roof".to_string(), tag.to_string())],
                    weight: Some(tag.to_string()),
                })
                .collect(),
        }
    }

    #[test]
    fn publish_then_consume_round_trips() {
        let state = SharedDisplayState::new();
        let snap = snapshot("a", 2);
        state.publish(snap.clone());
        assert_eq!(state.consume(), snap);
    }

    #[test]
    fn freshness_is_consumed_then_cleared() {
        let state = SharedDisplayState::new();
        assert!(!state.take_fresh());
        state.publish(snapshot("a", 1));
        assert!(state.take_fresh());
        assert!(!state.take_fresh());
    }

    #[test]
    fn consumers_never_observe_a_torn_snapshot() {
        let state = SharedDisplayState::new();
        state.publish(snapshot("x", 3));

        let writer = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                for round in 0..500 {
                    let tag = if round % 2 == 0 { "x" } else { "y" };
                    state.publish(snapshot(tag, 3));
                }
            })
        };

        for _ in 0..500 {
            let snap = state.consume();
            // every field in a snapshot must come from the same publish
            let tag = snap.hives[0].weight.clone().unwrap();
            for hive in &snap.hives {
                assert!(hive.id.starts_with(&tag));
                assert_eq!(hive.temperature[0].1, tag);
                assert_eq!(hive.humidity[0].1, tag);
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn stop_interrupts_a_long_wait_quickly() {
        let state = SharedDisplayState::new();
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                let started = Instant::now();
                let outcome = state.wait(Duration::from_secs(60));
                (outcome, started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(50));
        state.request_stop();
        let (outcome, took) = waiter.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Stopped);
        assert!(took < Duration::from_secs(2), "stop took {took:?}");
    }

    #[test]
    fn pause_change_interrupts_a_wait() {
        let state = SharedDisplayState::new();
        let waiter = {
            let state = Arc::clone(&state);
            thread::spawn(move || state.wait(Duration::from_secs(60)))
        };
        thread::sleep(Duration::from_millis(50));
        state.set_paused(true);
        assert_eq!(waiter.join().unwrap(), WaitOutcome::Interrupted);
    }

    #[test]
    fn short_waits_complete() {
        let state = SharedDisplayState::new();
        assert_eq!(state.wait(Duration::from_millis(20)), WaitOutcome::Completed);
    }
}
