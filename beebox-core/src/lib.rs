//! BeeBox Core - Hardware-independent logic for the BeeBox hive dashboard
//!
//! This crate contains the update and synchronization core: persisted
//! configuration with canonical hashing, the manifest-driven OTA engine,
//! the shared display state, and the background coordinator. Everything
//! here can be tested on the host platform without BeeBox hardware; the
//! firmware crate supplies the Wi-Fi, HTTP, and display collaborators
//! behind the traits defined in `http` and `coordinator`.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod manifest;
pub mod ota;
pub mod state;

pub use config::{Config, ConfigStore, Settings};
pub use coordinator::{ActivityIndicator, Coordinator, CoordinatorOptions, NetworkLink, SnapshotSource};
pub use error::{HttpError, OtaError};
pub use http::{HttpClient, HttpResponse};
pub use manifest::{FileEntry, Manifest};
pub use ota::OtaEngine;
pub use state::{HiveRecord, SensorSnapshot, SharedDisplayState, WaitOutcome};
