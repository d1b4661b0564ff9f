//! Manifest-driven OTA engine.
//!
//! `check_and_stage` is non-destructive by construction: it only ever
//! writes into the staging directory, and a single verification failure
//! aborts the whole batch. `apply_staged_at_boot` is the only operation
//! that mutates live files; it runs strictly before the coordinator
//! starts and is safe to re-run after a mid-apply power loss.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{self, Config, ConfigStore, CONFIG_FILE};
use crate::error::OtaError;
use crate::http::{join_url, HttpClient};
use crate::manifest::{is_safe_path, Manifest, MANIFEST_FILE};

/// Staged-but-not-applied files, mirroring the live tree's relative paths.
pub const UPDATE_DIR: &str = "UPDATE";
/// Pre-update originals, kept during (and after) an apply for rollback.
pub const BACKUP_DIR: &str = "OLD";
/// Persisted update transaction state; absence means no update pending.
pub const STATE_FILE: &str = "update_state.json";

const MANIFEST_TIMEOUT: Duration = Duration::from_secs(5);
const FILE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePhase {
    /// Every file downloaded and verified; waiting for a reboot.
    Staged,
    /// Apply started; a re-run after power loss picks up from here.
    Applying,
}

/// The update transaction record, written via write-new-then-rename so a
/// power cut never leaves an ambiguous half-written marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateState {
    pub phase: UpdatePhase,
    pub version: String,
    /// Relative paths actually staged (entries already matching the
    /// manifest hash are not re-downloaded and do not appear here).
    pub files: Vec<String>,
}

pub struct OtaEngine<H: HttpClient> {
    http: H,
    root: PathBuf,
    store: ConfigStore,
}

impl<H: HttpClient> OtaEngine<H> {
    pub fn new(root: &Path, http: H) -> Self {
        Self {
            http,
            root: root.to_path_buf(),
            store: ConfigStore::new(root),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    fn staging_dir(&self) -> PathBuf {
        self.root.join(UPDATE_DIR)
    }

    fn backup_dir(&self) -> PathBuf {
        self.root.join(BACKUP_DIR)
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    /// Checks the repository and stages a verified update if the remote
    /// version differs. Returns true when an update is staged and a
    /// reboot is pending. Performs no filesystem writes at all when the
    /// versions already match.
    pub fn check_and_stage(&mut self) -> Result<bool, OtaError> {
        let local = self.store.load();
        let manifest_url = join_url(&local.repo_url, MANIFEST_FILE);
        let response = self
            .http
            .get(&manifest_url, MANIFEST_TIMEOUT)?
            .ensure_ok(&manifest_url)?;
        let manifest = Manifest::parse(&response.body)?;

        if manifest.version == local.version {
            log::debug!("OTA: already on version {}", local.version);
            return Ok(false);
        }
        log::info!(
            "OTA: new version {} available (local {}), staging {} manifest entries",
            manifest.version,
            local.version,
            manifest.files.len()
        );

        // Guarantee no partial leftovers from an aborted earlier attempt.
        let staging = self.staging_dir();
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let mut staged = Vec::new();
        for entry in &manifest.files {
            if !is_safe_path(&entry.path) {
                return Err(OtaError::UnsafePath(entry.path.clone()));
            }

            let live = self.root.join(&entry.path);
            if live.is_file() {
                // An unreadable or unparseable live file just means "changed".
                if let Ok(current) = self.current_hash(&live, &entry.path) {
                    if current.eq_ignore_ascii_case(&entry.sha256) {
                        log::debug!("OTA: {} unchanged, skipping", entry.path);
                        continue;
                    }
                }
            }

            log::info!("OTA: downloading {}", entry.path);
            let url = join_url(&local.repo_url, &entry.path);
            let response = self.http.get(&url, FILE_TIMEOUT)?.ensure_ok(&url)?;

            let dest = staging.join(&entry.path);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&dest, &response.body)?;

            let actual = self.current_hash(&dest, &entry.path)?;
            if !actual.eq_ignore_ascii_case(&entry.sha256) {
                // Abort the whole batch before any live-file mutation. The
                // staging directory is left behind for inspection; the next
                // attempt clears it.
                return Err(OtaError::HashMismatch {
                    path: entry.path.clone(),
                    expected: entry.sha256.clone(),
                    actual,
                });
            }
            staged.push(entry.path.clone());
        }

        // Every file verified: commit the transaction record, then flag
        // the reboot. A version bump with zero changed files still stages.
        self.write_state(&UpdateState {
            phase: UpdatePhase::Staged,
            version: manifest.version.clone(),
            files: staged,
        })?;
        let mut local = self.store.load();
        local.pending_reboot = true;
        self.store.save(&local)?;
        log::info!("OTA: version {} staged, reboot pending", manifest.version);
        Ok(true)
    }

    /// Applies a staged update. Must run before the coordinator starts.
    /// No-op when nothing is staged; idempotent after a partial apply.
    pub fn apply_staged_at_boot(&mut self) -> Result<(), OtaError> {
        let Some(mut state) = self.read_state()? else {
            return Ok(());
        };
        log::info!("OTA: applying staged version {}", state.version);

        if state.phase != UpdatePhase::Applying {
            state.phase = UpdatePhase::Applying;
            self.write_state(&state)?;
        }

        let staging = self.staging_dir();
        let backup = self.backup_dir();
        for rel in &state.files {
            if rel == CONFIG_FILE {
                continue; // merged below, never swapped wholesale
            }
            let staged = staging.join(rel);
            let live = self.root.join(rel);
            if !staged.is_file() {
                if live.exists() {
                    // Already swapped by an interrupted earlier apply.
                    log::debug!("OTA: {rel} already applied");
                    continue;
                }
                return Err(OtaError::MissingStaged(rel.clone()));
            }

            if live.exists() {
                // Backup-before-swap is what makes rollback possible. A
                // leftover backup from a prior partial apply is replaced.
                let slot = backup.join(rel);
                if let Some(parent) = slot.parent() {
                    fs::create_dir_all(parent)?;
                }
                if slot.exists() {
                    fs::remove_file(&slot)?;
                }
                fs::rename(&live, &slot)?;
            } else if let Some(parent) = live.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&staged, &live)?;
        }

        let mut config = self.store.load();
        let staged_config = staging.join(CONFIG_FILE);
        if staged_config.is_file() {
            if self.store.path().is_file() {
                let slot = backup.join(CONFIG_FILE);
                fs::create_dir_all(&backup)?;
                fs::copy(self.store.path(), &slot)?;
            }
            let remote_doc = fs::read(&staged_config)?;
            config::merge_remote(&mut config, &remote_doc)?;
        }
        // The version string changes only here, as the last step of a
        // fully-applied update.
        config.version = state.version.clone();
        config.pending_reboot = false;
        self.store.save(&config)?;

        fs::remove_file(self.state_path())?;
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        log::info!("OTA: version {} applied", state.version);
        Ok(())
    }

    /// Restores the listed files from the backup directory. Files with no
    /// backup entry are left untouched. The version string is not changed;
    /// that policy decision belongs to the caller.
    pub fn rollback(&self, files: &[String]) -> Result<(), OtaError> {
        let backup = self.backup_dir();
        for rel in files {
            let slot = backup.join(rel);
            if !slot.is_file() {
                log::debug!("rollback: no backup for {rel}, skipping");
                continue;
            }
            let live = self.root.join(rel);
            if live.exists() {
                fs::remove_file(&live)?;
            }
            if let Some(parent) = live.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::rename(&slot, &live)?;
            log::info!("rollback: restored {rel}");
        }
        Ok(())
    }

    /// The manifest compares the designated config file by canonical hash
    /// so local-only keys and key order never look like a change.
    fn current_hash(&self, path: &Path, rel: &str) -> Result<String, OtaError> {
        let bytes = fs::read(path)?;
        if rel == CONFIG_FILE {
            Ok(config::canonical_hash(&bytes)?)
        } else {
            Ok(config::sha256_hex(&bytes))
        }
    }

    fn read_state(&self) -> Result<Option<UpdateState>, OtaError> {
        let bytes = match fs::read(self.state_path()) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                // Renamed-in-place writes make a torn record impossible, so
                // treat garbage as "nothing pending" rather than bricking.
                log::warn!("ignoring unreadable {STATE_FILE}: {e}");
                Ok(None)
            }
        }
    }

    fn write_state(&self, state: &UpdateState) -> Result<(), OtaError> {
        let bytes = serde_json::to_vec(state)?;
        config::write_atomic(&self.state_path(), &bytes)?;
        Ok(())
    }
}
