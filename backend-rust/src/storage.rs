//! # storage
//!
//! Everything that touches disk: the persistent user config, the append-only
//! session directory and the report export directory.
//!
//! Loads are tolerant (missing or corrupt files fall back to defaults, with
//! corrupt config left in place for manual recovery); config saves are
//! atomic via write-temp-then-rename. Session files are write-once, keyed
//! by timestamp.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::metrics::SessionMetrics;
use crate::session::SessionArtifact;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

// ── Paths ─────────────────────────────────────────────────────────────────────

/// User-writable application directories.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: PathBuf,
    pub config_json: PathBuf,
    pub sessions_dir: PathBuf,
    pub export_dir: PathBuf,
}

impl AppPaths {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_json: root.join("config.json"),
            sessions_dir: root.join("sessions"),
            export_dir: root.join("export"),
            root,
        }
    }

    /// Root from `COACH_DATA_DIR`, defaulting to `./coach-data`.
    pub fn from_env() -> Self {
        let root = std::env::var("COACH_DATA_DIR").unwrap_or_else(|_| "./coach-data".to_string());
        Self::at(root)
    }

    pub fn ensure_dirs(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.root)?;
        fs::create_dir_all(&self.sessions_dir)?;
        fs::create_dir_all(&self.export_dir)?;
        Ok(())
    }
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerRoles {
    pub left_foot: Option<String>,
    pub right_foot: Option<String>,
    pub waist: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StationAssignment {
    pub station_a: Option<String>,
    pub station_b: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    pub repo: Option<String>,
    pub last_check_utc: Option<DateTime<Utc>>,
    pub auto_check: bool,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            repo: None,
            last_check_utc: None,
            auto_check: true,
        }
    }
}

/// Persistent user configuration. Unrecognized keys survive a load/save
/// round-trip through `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub first_run_completed: bool,
    pub last_seen_version: Option<String>,
    pub trackers: TrackerRoles,
    pub base_stations: StationAssignment,
    pub baseline_session: Option<String>,
    pub update: UpdateSettings,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Config {
    /// Serial → role-name map for the three configured trackers.
    pub fn tracker_roles_by_serial(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if let Some(serial) = &self.trackers.left_foot {
            out.insert(serial.clone(), "Left Foot".to_string());
        }
        if let Some(serial) = &self.trackers.right_foot {
            out.insert(serial.clone(), "Right Foot".to_string());
        }
        if let Some(serial) = &self.trackers.waist {
            out.insert(serial.clone(), "Waist".to_string());
        }
        out
    }

    /// Serial → "Station A"/"Station B" label map.
    pub fn station_labels_by_serial(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        if let Some(serial) = &self.base_stations.station_a {
            out.insert(serial.clone(), "Station A".to_string());
        }
        if let Some(serial) = &self.base_stations.station_b {
            out.insert(serial.clone(), "Station B".to_string());
        }
        out
    }
}

/// Load the config, backfilling defaults for anything missing. A corrupt
/// file yields the default config and is left on disk untouched.
pub fn load_config(paths: &AppPaths) -> Config {
    let raw = match fs::read_to_string(&paths.config_json) {
        Ok(raw) => raw,
        Err(_) => return Config::default(),
    };
    match serde_json::from_str::<Config>(&raw) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("config.json unreadable ({e}); using defaults, file left in place");
            Config::default()
        }
    }
}

/// Atomic save: write a temp file next to the target, then rename over it.
pub fn save_config(paths: &AppPaths, config: &Config) -> Result<(), StorageError> {
    paths.ensure_dirs()?;
    let tmp = paths.config_json.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(config)?)?;
    fs::rename(&tmp, &paths.config_json)?;
    Ok(())
}

// ── Sessions ──────────────────────────────────────────────────────────────────

/// Persist a session artifact as `sessions/{timestamp}.json`.
pub fn save_session(paths: &AppPaths, artifact: &SessionArtifact) -> Result<PathBuf, StorageError> {
    paths.ensure_dirs()?;
    let out = paths.sessions_dir.join(format!("{}.json", artifact.timestamp));
    fs::write(&out, serde_json::to_string_pretty(artifact)?)?;
    info!("session saved: {}", out.display());
    Ok(out)
}

/// All session files, sorted by filename (and therefore by timestamp).
pub fn list_sessions(paths: &AppPaths) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(&paths.sessions_dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();
    files
}

/// Decode one session file; `None` on any read or parse failure.
pub fn load_session(path: &Path) -> Option<SessionArtifact> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

// ── Report export ─────────────────────────────────────────────────────────────

/// Write `{timestamp}_summary.txt` and `{timestamp}_session.json` side by
/// side into the export directory. Returns (summary_path, session_path).
pub fn export_report(
    paths: &AppPaths,
    summary_text: &str,
    artifact: &SessionArtifact,
) -> Result<(PathBuf, PathBuf), StorageError> {
    paths.ensure_dirs()?;
    let summary_path = paths
        .export_dir
        .join(format!("{}_summary.txt", artifact.timestamp));
    let session_path = paths
        .export_dir
        .join(format!("{}_session.json", artifact.timestamp));
    fs::write(&summary_path, summary_text)?;
    fs::write(&session_path, serde_json::to_string_pretty(artifact)?)?;
    info!("report exported: {}", summary_path.display());
    Ok((summary_path, session_path))
}

/// Human-readable per-tracker summary of a finished diagnostic.
pub fn render_summary(artifact: &SessionArtifact, metrics: &SessionMetrics) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Lighthouse Layout Coach — diagnostic summary");
    let _ = writeln!(out, "Session: {}", artifact.timestamp);
    let _ = writeln!(out, "Duration: {:.0}s", artifact.duration_s);
    if let Some(cov) = &artifact.coverage_summary {
        let _ = writeln!(
            out,
            "Coverage: overall {:.0}/100, foot overlap {:.1}%, waist overlap {:.1}%",
            cov.overall_score, cov.overlap_pct_foot, cov.overlap_pct_waist
        );
    }
    let _ = writeln!(out);
    for tm in &metrics.per_tracker {
        let _ = writeln!(out, "{} ({})", tm.role, tm.serial);
        let _ = writeln!(
            out,
            "  dropouts: {} ({:.2}s total)",
            tm.dropout_count, tm.dropout_duration_s
        );
        let _ = writeln!(
            out,
            "  jitter pos p50/p95: {:.1}/{:.1} mm",
            tm.jitter_pos_rms_m_p50 * 1000.0,
            tm.jitter_pos_rms_m_p95 * 1000.0
        );
        let _ = writeln!(
            out,
            "  jitter yaw p50/p95: {:.2}/{:.2}°",
            tm.jitter_yaw_deg_p50, tm.jitter_yaw_deg_p95
        );
    }
    out
}
