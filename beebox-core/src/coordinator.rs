//! The single perpetual background worker.
//!
//! One cycle: ensure connectivity, refresh hive data into the shared
//! state, and (once data has been fetched successfully at least once this
//! boot) run a scheduled OTA check. Pause skips all network work; stop
//! exits within one wait slice. No single failure terminates the loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::config::{ConfigStore, Settings};
use crate::http::HttpClient;
use crate::ota::OtaEngine;
use crate::state::{SensorSnapshot, SharedDisplayState, WaitOutcome};

/// Wi-Fi collaborator boundary. The implementation owns the
/// repeated-failure policy (counting across cycles, forcing a restart);
/// the coordinator only logs and retries within a cycle.
pub trait NetworkLink {
    fn is_connected(&mut self) -> bool;
    fn ensure_connected(&mut self, timeout: Duration) -> bool;
}

/// Data-fetch collaborator boundary (the hive page scraper).
pub trait SnapshotSource {
    fn fetch_snapshot(&mut self) -> Result<SensorSnapshot>;
}

/// Display boundary for transient busy/error indications. Implementations
/// must be brief and must never block the coordinator on rendering.
pub trait ActivityIndicator {
    fn busy(&self, on: bool);
    fn error(&self, what: &str);
}

/// Indicator for builds without a display attached.
pub struct NullIndicator;

impl ActivityIndicator for NullIndicator {
    fn busy(&self, _on: bool) {}
    fn error(&self, _what: &str) {}
}

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// Grace period after boot before the first cycle.
    pub startup_grace: Duration,
    /// Attempts per fetch cycle and the delay between them.
    pub fetch_attempts: u32,
    pub fetch_retry_delay: Duration,
    /// Poll cadence while paused.
    pub paused_poll: Duration,
    /// Timeout handed to `NetworkLink::ensure_connected`.
    pub connect_timeout: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(5),
            fetch_attempts: 3,
            fetch_retry_delay: Duration::from_secs(2),
            paused_poll: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

pub struct Coordinator<N, S, H, A>
where
    N: NetworkLink,
    S: SnapshotSource,
    H: HttpClient,
    A: ActivityIndicator,
{
    shared: Arc<SharedDisplayState>,
    network: N,
    source: S,
    indicator: A,
    ota: OtaEngine<H>,
    store: ConfigStore,
    root: PathBuf,
    options: CoordinatorOptions,
    /// Sticky: OTA checks are gated on one proven-good fetch this boot.
    initial_fetch_done: bool,
    last_ota_check: Option<Instant>,
}

impl<N, S, H, A> Coordinator<N, S, H, A>
where
    N: NetworkLink,
    S: SnapshotSource,
    H: HttpClient,
    A: ActivityIndicator,
{
    pub fn new(
        root: &Path,
        shared: Arc<SharedDisplayState>,
        network: N,
        source: S,
        indicator: A,
        ota: OtaEngine<H>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            shared,
            network,
            source,
            indicator,
            ota,
            store: ConfigStore::new(root),
            root: root.to_path_buf(),
            options,
            initial_fetch_done: false,
            last_ota_check: None,
        }
    }

    /// Runs forever until stop is requested. Every cycle's failure is
    /// caught here so the worker survives anything a cycle throws.
    pub fn run(mut self) {
        log::info!("background coordinator started");
        if self.shared.wait(self.options.startup_grace) == WaitOutcome::Stopped {
            return;
        }

        loop {
            if self.shared.should_stop() {
                break;
            }
            if self.shared.is_paused() {
                // foreground owns the device; no network work at all
                if self.shared.wait(self.options.paused_poll) == WaitOutcome::Stopped {
                    break;
                }
                continue;
            }

            if let Err(e) = self.run_cycle() {
                log::warn!("background cycle failed: {e:#}");
                self.indicator.error("update");
            }

            // interval is re-read each cycle so menu edits apply live
            let period = Settings::load(&self.root).update_period_secs;
            if self.shared.wait(Duration::from_secs(period)) == WaitOutcome::Stopped {
                break;
            }
        }
        log::info!("background coordinator stopped");
    }

    fn run_cycle(&mut self) -> Result<()> {
        if !self.network.is_connected() {
            log::info!("Wi-Fi down, attempting reconnect");
            if !self.network.ensure_connected(self.options.connect_timeout) {
                // repeated-failure escalation lives in the NetworkLink impl
                log::warn!("Wi-Fi reconnect failed, retrying next cycle");
                self.indicator.error("wifi");
                return Ok(());
            }
        }

        let Some(snapshot) = self.fetch_with_retries() else {
            self.indicator.error("data");
            return Ok(());
        };
        self.shared.publish(snapshot);
        self.initial_fetch_done = true;

        if self.ota_check_due() {
            // timestamp moves regardless of outcome so a failing repo
            // is not hammered every cycle
            self.last_ota_check = Some(Instant::now());
            match self.ota.check_and_stage() {
                Ok(true) => {
                    log::info!("update staged; reboot will apply it");
                    self.shared.set_update_ready(true);
                }
                Ok(false) => log::debug!("no update available"),
                Err(e) => {
                    log::warn!("OTA check failed: {e}");
                    self.indicator.error("ota");
                }
            }
        }
        Ok(())
    }

    fn fetch_with_retries(&mut self) -> Option<SensorSnapshot> {
        self.indicator.busy(true);
        let mut result = None;
        for attempt in 1..=self.options.fetch_attempts {
            match self.source.fetch_snapshot() {
                Ok(snapshot) => {
                    result = Some(snapshot);
                    break;
                }
                Err(e) => {
                    log::warn!(
                        "hive data fetch failed (attempt {attempt}/{}): {e:#}",
                        self.options.fetch_attempts
                    );
                    if attempt < self.options.fetch_attempts
                        && self.shared.wait(self.options.fetch_retry_delay) == WaitOutcome::Stopped
                    {
                        break;
                    }
                }
            }
        }
        self.indicator.busy(false);
        result
    }

    fn ota_check_due(&self) -> bool {
        if !self.initial_fetch_done {
            return false;
        }
        let hours = self.store.load().check_interval_hours;
        match self.last_ota_check {
            None => true,
            Some(at) => at.elapsed() >= Duration::from_secs(u64::from(hours) * 3600),
        }
    }
}
