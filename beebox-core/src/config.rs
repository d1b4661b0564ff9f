//! Persisted device configuration and user settings.
//!
//! Two documents live at the firmware root: `config.json` (device state,
//! participates in OTA comparison via the canonical hash) and
//! `settings.json` (user preferences edited from the menu, never shipped
//! by an update).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const CONFIG_FILE: &str = "config.json";
pub const SETTINGS_FILE: &str = "settings.json";

/// Keys that are local to this device. They are stripped before hashing
/// and a remote config merge never overwrites them.
pub const RUNTIME_ONLY_KEYS: &[&str] = &["setup_complete", "last_sensor_mode", "pending_reboot"];

/// Device state document (`config.json`).
///
/// Unknown keys are preserved round-trip so a newer release can ship
/// fields this build does not know about yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_repo_url")]
    pub repo_url: String,
    #[serde(default = "default_check_interval_hours")]
    pub check_interval_hours: u32,
    #[serde(default)]
    pub pending_reboot: bool,

    // Runtime-only state, excluded from the canonical hash
    #[serde(default)]
    pub setup_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sensor_mode: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_version() -> String {
    "0.0.0".to_string()
}

fn default_repo_url() -> String {
    "https://raw.githubusercontent.com/bee-box/beebox-display/main/".to_string()
}

fn default_check_interval_hours() -> u32 {
    24 * 7
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            repo_url: default_repo_url(),
            check_interval_hours: default_check_interval_hours(),
            pending_reboot: false,
            setup_complete: false,
            last_sensor_mode: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// User preferences (`settings.json`). Missing keys fall back to their
/// defaults on load, so an upgrade that adds a setting needs no migration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_true")]
    pub autoscroll: bool,
    #[serde(default = "default_update_period")]
    pub update_period_secs: u64,
    #[serde(default = "default_brightness")]
    pub brightness: u8,
    #[serde(default)]
    pub units: Units,
    #[serde(default = "default_true")]
    pub wifi_auto_reconnect: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Units {
    #[default]
    #[serde(rename = "C")]
    Celsius,
    #[serde(rename = "F")]
    Fahrenheit,
}

fn default_true() -> bool {
    true
}

fn default_update_period() -> u64 {
    300
}

fn default_brightness() -> u8 {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            autoscroll: true,
            update_period_secs: default_update_period(),
            brightness: default_brightness(),
            units: Units::default(),
            wifi_auto_reconnect: true,
        }
    }
}

impl Settings {
    /// Loads settings, resetting to defaults if the file is missing or
    /// corrupt. A reset is written back so the next load is clean.
    pub fn load(root: &Path) -> Self {
        let path = root.join(SETTINGS_FILE);
        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(settings) => settings,
                Err(e) => {
                    log::warn!("settings.json corrupted ({e}), resetting to defaults");
                    let settings = Self::default();
                    let _ = settings.save(root);
                    settings
                }
            },
            Err(_) => {
                let settings = Self::default();
                let _ = settings.save(root);
                settings
            }
        }
    }

    pub fn save(&self, root: &Path) -> io::Result<()> {
        let bytes = serde_json::to_vec(self).map_err(io::Error::other)?;
        write_atomic(&root.join(SETTINGS_FILE), &bytes)
    }
}

/// Handle to the persisted `config.json`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(root: &Path) -> Self {
        Self {
            path: root.join(CONFIG_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the config, falling back to in-memory defaults if the file is
    /// missing or unparseable. A corrupt config must never take the
    /// coordinator down.
    pub fn load(&self) -> Config {
        match fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("config.json corrupted ({e}), using defaults");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }

    pub fn save(&self, config: &Config) -> io::Result<()> {
        let bytes = serde_json::to_vec(config).map_err(io::Error::other)?;
        write_atomic(&self.path, &bytes)
    }
}

/// Canonical hash of a configuration document.
///
/// Producer (`tools/manifest`) and consumer (OTA engine) must agree on
/// this byte-for-byte: parse as JSON, drop runtime-only keys, serialize
/// with sorted keys and no whitespace, then SHA-256. Two configs that
/// differ only in key order or local-only state hash identically.
pub fn canonical_hash(bytes: &[u8]) -> Result<String, serde_json::Error> {
    let mut doc: Value = serde_json::from_slice(bytes)?;
    if let Value::Object(map) = &mut doc {
        for key in RUNTIME_ONLY_KEYS {
            map.remove(*key);
        }
    }
    // serde_json objects iterate in sorted key order, so this is already
    // the canonical serialization.
    let canonical = serde_json::to_vec(&doc)?;
    Ok(sha256_hex(&canonical))
}

/// Direct SHA-256 of raw bytes, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Merges every non-runtime key of a remote config document into the
/// local config. Runtime-only keys keep their local values.
pub fn merge_remote(local: &mut Config, remote_doc: &[u8]) -> Result<(), serde_json::Error> {
    let remote: Value = serde_json::from_slice(remote_doc)?;
    let mut doc = serde_json::to_value(&*local)?;
    if let (Value::Object(doc), Value::Object(remote)) = (&mut doc, remote) {
        for (key, value) in remote {
            if !RUNTIME_ONLY_KEYS.contains(&key.as_str()) {
                doc.insert(key, value);
            }
        }
    }
    *local = serde_json::from_value(doc)?;
    Ok(())
}

/// Write-new-then-rename so a power cut mid-write never leaves a torn
/// document behind.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn canonical_hash_ignores_key_order() {
        let a = br#"{"version": "1.0.2", "repo_url": "http://r/", "check_interval_hours": 168}"#;
        let b = br#"{"check_interval_hours": 168, "repo_url": "http://r/", "version": "1.0.2"}"#;
        assert_eq!(canonical_hash(a).unwrap(), canonical_hash(b).unwrap());
    }

    #[test]
    fn canonical_hash_ignores_runtime_only_keys() {
        let clean = br#"{"version": "1.0.2", "repo_url": "http://r/"}"#;
        let dirty = br#"{
            "version": "1.0.2",
            "repo_url": "http://r/",
            "setup_complete": true,
            "last_sensor_mode": "sensor_temp",
            "pending_reboot": true
        }"#;
        assert_eq!(canonical_hash(clean).unwrap(), canonical_hash(dirty).unwrap());
    }

    #[test]
    fn canonical_hash_sees_real_changes() {
        let a = br#"{"version": "1.0.2", "repo_url": "http://r/"}"#;
        let b = br#"{"version": "1.0.3", "repo_url": "http://r/"}"#;
        assert_ne!(canonical_hash(a).unwrap(), canonical_hash(b).unwrap());
    }

    #[test]
    fn merge_remote_preserves_runtime_keys() {
        let mut local = Config {
            setup_complete: true,
            last_sensor_mode: Some("sensor_humidity".to_string()),
            pending_reboot: true,
            ..Config::default()
        };
        let remote = br#"{
            "version": "1.0.3",
            "repo_url": "http://new-repo/",
            "check_interval_hours": 24,
            "setup_complete": false,
            "pending_reboot": false
        }"#;
        merge_remote(&mut local, remote).unwrap();
        assert_eq!(local.version, "1.0.3");
        assert_eq!(local.repo_url, "http://new-repo/");
        assert_eq!(local.check_interval_hours, 24);
        assert!(local.setup_complete);
        assert!(local.pending_reboot);
        assert_eq!(local.last_sensor_mode.as_deref(), Some("sensor_humidity"));
    }

    #[test]
    fn merge_remote_keeps_unknown_keys() {
        let mut local = Config::default();
        merge_remote(&mut local, br#"{"hive_site": "orchard"}"#).unwrap();
        assert_eq!(local.extra.get("hive_site").and_then(Value::as_str), Some("orchard"));
    }

    #[test]
    fn store_round_trips_unknown_keys() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path());
        let mut config = Config::default();
        config.extra.insert("hive_site".to_string(), Value::from("orchard"));
        store.save(&config).unwrap();
        assert_eq!(store.load(), config);
    }

    #[test]
    fn store_falls_back_to_defaults_on_corruption() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(CONFIG_FILE), b"{ not json").unwrap();
        let store = ConfigStore::new(dir.path());
        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn settings_fill_missing_keys_from_defaults() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), br#"{"units": "F"}"#).unwrap();
        let settings = Settings::load(dir.path());
        assert_eq!(settings.units, Units::Fahrenheit);
        assert!(settings.autoscroll);
        assert_eq!(settings.update_period_secs, 300);
    }

    #[test]
    fn settings_reset_on_corruption() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), b"garbage").unwrap();
        assert_eq!(Settings::load(dir.path()), Settings::default());
        // reset was persisted
        let reloaded: Settings =
            serde_json::from_slice(&fs::read(dir.path().join(SETTINGS_FILE)).unwrap()).unwrap();
        assert_eq!(reloaded, Settings::default());
    }
}
