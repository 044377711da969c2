//! Persisted settings record
//!
//! One JSON document holding the dark-mode flag, the difficulty and the
//! ordered player list. A record written by a different version is discarded,
//! never migrated.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::players::{Calibration, MAX_PLAYERS};

/// Version stamped into every record
pub const SETTINGS_VERSION: u32 = 2;

/// Default detection threshold of a new player
pub const DEFAULT_THRESHOLD: u8 = 50;

/// A player as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerProfile {
    pub name: String,
    pub ip: String,
    pub threshold: u8,
    pub calibration: Calibration,
}

impl PlayerProfile {
    /// Profile for the `position`-th player (1-based)
    pub fn numbered(position: usize) -> Self {
        Self {
            name: format!("Player {}", position),
            ip: format!("192.168.1.{}", position + 1),
            threshold: DEFAULT_THRESHOLD,
            calibration: Calibration::default(),
        }
    }
}

/// The whole persisted record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub version: u32,
    pub dark: bool,
    pub difficulty: usize,
    pub players: Vec<PlayerProfile>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            dark: false,
            difficulty: 0,
            players: vec![PlayerProfile::numbered(1)],
        }
    }
}

/// Settings store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Settings I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Settings encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Calibration of \"{0}\" is not a finite number")]
    InvalidCalibration(String),
}

#[derive(Deserialize)]
struct VersionProbe {
    version: Option<u32>,
}

/// File-backed settings
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored record, falling back to defaults when it is missing,
    /// unreadable or from another version
    pub fn load(&self) -> Settings {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Settings::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read settings");
                return Settings::default();
            }
        };

        let version = serde_json::from_str::<VersionProbe>(&raw)
            .ok()
            .and_then(|probe| probe.version);
        if version != Some(SETTINGS_VERSION) {
            info!(path = %self.path.display(), ?version, "Discarding settings from another version");
            if let Err(e) = self.reset() {
                warn!(error = %e, "Failed to remove outdated settings");
            }
            return Settings::default();
        }

        match serde_json::from_str::<Settings>(&raw) {
            Ok(settings) => sanitize(settings),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Malformed settings, using defaults");
                Settings::default()
            }
        }
    }

    /// Write the whole record. A record that could not be read back is
    /// refused and the file on disk is left as it was.
    pub fn save(&self, settings: &Settings) -> Result<(), StoreError> {
        if let Some(bad) = settings.players.iter().find(|p| !p.calibration.is_finite()) {
            return Err(StoreError::InvalidCalibration(bad.name.clone()));
        }
        let json = serde_json::to_string_pretty(settings)?;
        fs::write(&self.path, json)?;
        Ok(())
    }

    /// Forget the stored record
    pub fn reset(&self) -> Result<(), StoreError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Enforce player-count and unique-name invariants on a loaded record
fn sanitize(mut settings: Settings) -> Settings {
    let mut seen = Vec::new();
    settings.players.retain(|p| {
        if p.name.trim().is_empty() || seen.contains(&p.name) {
            warn!(name = %p.name, "Dropping stored player with invalid or duplicate name");
            return false;
        }
        seen.push(p.name.clone());
        true
    });
    settings.players.truncate(MAX_PLAYERS);
    if settings.players.is_empty() {
        settings.players.push(PlayerProfile::numbered(1));
    }
    settings
}
