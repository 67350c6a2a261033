//! Persisted diagnostic-session artifact types.
//!
//! A session is written exactly once, keyed by its timestamp, and re-read by
//! the historical ingest and the report exporter. The JSON layout is the
//! stable on-disk contract; all fields use snake_case.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vr_types::geometry::{Mat3, Vec3};
use vr_types::{PlayArea, StationPose};

use crate::coverage::CoverageSummary;

/// One tracker reading inside a sample. `ok` mirrors the runtime's
/// pose-valid + RUNNING_OK check; position/yaw are absent when the device
/// was not enumerable at that tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<Vec3>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaw_deg: Option<f64>,
    pub ok: bool,
}

impl TrackerSample {
    pub fn missing() -> Self {
        Self {
            pos: None,
            yaw_deg: None,
            ok: false,
        }
    }
}

/// One capture tick. Samples within an artifact are strictly increasing in
/// `t_s`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSample {
    pub t_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmd_yaw_deg: Option<f64>,
    pub trackers: BTreeMap<String, TrackerSample>,
}

/// Station pose as persisted in a session file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationRecord {
    pub serial: String,
    pub pos: Vec3,
    pub rot: Mat3,
}

impl From<&StationPose> for StationRecord {
    fn from(s: &StationPose) -> Self {
        Self {
            serial: s.serial.clone(),
            pos: s.position,
            rot: s.rotation,
        }
    }
}

impl StationRecord {
    pub fn to_pose(&self) -> StationPose {
        StationPose {
            serial: self.serial.clone(),
            position: self.pos,
            rotation: self.rot,
        }
    }
}

/// Immutable result of one scripted diagnostic run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionArtifact {
    /// `YYYYMMDD_HHMMSS`; doubles as the session filename stem.
    pub timestamp: String,
    pub duration_s: f64,
    pub tracker_roles_by_serial: BTreeMap<String, String>,
    pub stations: Vec<StationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub play_area: Option<PlayArea>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage_summary: Option<CoverageSummary>,
    pub samples: Vec<SessionSample>,
}
