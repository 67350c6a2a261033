//! # vr-types
//!
//! Shared data model for the Lighthouse Layout Coach: geometry primitives,
//! tracked-device descriptions, the play-area polygon, and the `PoseSource`
//! contract that the backend polls.
//!
//! These types are used by:
//! - `backend-rust`: the state engine, coverage/metrics engines and HTTP API
//! - `rig-simulator`: the scripted rig that stands in for a live VR runtime
//!
//! ## Coordinate conventions
//!
//! - **Standing universe**: Z up, XY is the floor plane, meters.
//! - **Device frame**: forward is −Z of the device rotation, right +X, up +Y.
//! - Device *indices* are opaque and stable only within a single runtime
//!   session; *serials* are the durable identity and are what gets persisted.

pub mod geometry;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use geometry::{Mat3, Vec2, Vec3};

// ── Tracking results ──────────────────────────────────────────────────────────

/// The runtime's "tracking is healthy" result code.
pub const TRACKING_RESULT_RUNNING_OK: i32 = 200;

// ── Poses ─────────────────────────────────────────────────────────────────────

/// A device-to-absolute transform sample in the standing universe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Mat3,
    pub valid: bool,
    pub tracking_result: i32,
}

impl Pose {
    /// A pose is usable only when it is valid and the runtime reports
    /// `RUNNING_OK`.
    pub fn is_ok(&self) -> bool {
        self.valid && self.tracking_result == TRACKING_RESULT_RUNNING_OK
    }

    /// Yaw of the device forward axis in the floor plane, degrees.
    pub fn yaw_deg(&self) -> f64 {
        self.rotation.yaw_deg()
    }
}

// ── Devices ───────────────────────────────────────────────────────────────────

/// Tracked-device class as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceClass {
    Invalid,
    Hmd,
    Controller,
    GenericTracker,
    TrackingReference,
    DisplayRedirect,
}

/// One enumerated device. `index` is only meaningful within the current
/// runtime session; `serial` is the durable identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub index: u32,
    pub class: DeviceClass,
    pub model: String,
    pub serial: String,
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pose: Option<Pose>,
}

// ── Play area ─────────────────────────────────────────────────────────────────

/// Where the play-area polygon came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayAreaSource {
    Chaperone,
    Default,
}

/// User-configured safe-region polygon in the floor plane.
/// Invariant: `corners.len() >= 3`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayArea {
    pub corners: Vec<Vec2>,
    pub source: PlayAreaSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl PlayArea {
    /// Fallback bounds when no chaperone data is available: a 2 m × 2 m
    /// square centered at the origin, flagged with a warning.
    pub fn default_square() -> Self {
        let half = 1.0;
        Self {
            corners: vec![
                Vec2::new(-half, -half),
                Vec2::new(half, -half),
                Vec2::new(half, half),
                Vec2::new(-half, half),
            ],
            source: PlayAreaSource::Default,
            warning: Some(
                "Chaperone bounds unavailable; using default 2m x 2m square centered at origin."
                    .to_string(),
            ),
        }
    }

    /// Vertex centroid of the polygon.
    pub fn centroid(&self) -> Vec2 {
        let n = self.corners.len().max(1) as f64;
        let (sx, sy) = self
            .corners
            .iter()
            .fold((0.0, 0.0), |(sx, sy), c| (sx + c.x, sy + c.y));
        Vec2::new(sx / n, sy / n)
    }
}

// ── Base stations ─────────────────────────────────────────────────────────────

/// A tracking reference (base station) with a valid pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationPose {
    pub serial: String,
    pub position: Vec3,
    pub rotation: Mat3,
}

// ── Pose source contract ──────────────────────────────────────────────────────

/// Errors surfaced by a pose-source adapter.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The VR runtime is not running or tore down the connection.
    #[error("RuntimeUnavailable: {0}")]
    RuntimeUnavailable(String),
    /// A single poll failed; the caller should drop to disconnected and
    /// reinitialize after a cooldown.
    #[error("TransientPollFailure: {0}")]
    Poll(String),
}

/// Contract over a VR runtime. The backend owns exactly one implementation
/// and touches it only from its poller and diagnostic threads.
///
/// `init` and `shutdown` must be idempotent. `play_area` never fails: an
/// implementation falls back to [`PlayArea::default_square`] when live
/// chaperone data cannot be read.
pub trait PoseSource: Send + Sync {
    fn init(&self) -> Result<(), AdapterError>;
    fn shutdown(&self);
    fn enumerate(&self) -> Result<Vec<DeviceInfo>, AdapterError>;
    fn play_area(&self) -> PlayArea;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_ok_requires_valid_and_running() {
        let mut pose = Pose {
            position: Vec3::default(),
            rotation: Mat3::IDENTITY,
            valid: true,
            tracking_result: TRACKING_RESULT_RUNNING_OK,
        };
        assert!(pose.is_ok());
        pose.valid = false;
        assert!(!pose.is_ok());
        pose.valid = true;
        pose.tracking_result = 201; // Running_OutOfRange
        assert!(!pose.is_ok());
    }

    #[test]
    fn default_square_is_centered_and_flagged() {
        let pa = PlayArea::default_square();
        assert_eq!(pa.corners.len(), 4);
        assert_eq!(pa.source, PlayAreaSource::Default);
        assert!(pa.warning.is_some());
        let c = pa.centroid();
        assert!(c.x.abs() < 1e-12 && c.y.abs() < 1e-12);
    }
}
