//! # rig-simulator
//!
//! A scripted lighthouse rig (two base stations, three body trackers, one
//! HMD) that stands in for a live VR runtime during development and tests.
//! Implements the [`PoseSource`] contract the backend polls, so the whole
//! engine runs against it unchanged.
//!
//! The virtual user runs the diagnostic protocol on a loop; scenario presets
//! inject setup faults (occlusion dropouts, a low or misaimed station,
//! missing chaperone bounds, flaky runtime init).

pub mod rig;
pub mod scenarios;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::debug;
use vr_types::geometry::{Mat3, Vec2, Vec3};
use vr_types::{
    AdapterError, DeviceClass, DeviceInfo, PlayArea, PlayAreaSource, Pose, PoseSource,
    TRACKING_RESULT_RUNNING_OK,
};

use rig::{user_sample, MotionConfig};
use scenarios::{ScenarioConfig, ScenarioType};

// ── Device identities ─────────────────────────────────────────────────────────

pub const HMD_SERIAL: &str = "LHR-HMD00001";
pub const STATION_A_SERIAL: &str = "LHB-STATION1";
pub const STATION_B_SERIAL: &str = "LHB-STATION2";
pub const LEFT_FOOT_SERIAL: &str = "LHR-FOOT0001";
pub const RIGHT_FOOT_SERIAL: &str = "LHR-FOOT0002";
pub const WAIST_SERIAL: &str = "LHR-WAIST001";

/// Tracking result reported while a tracker is scripted as dropped.
const TRACKING_RESULT_OUT_OF_RANGE: i32 = 201;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub width_m: f64,
    pub depth_m: f64,
    /// How far beyond the room corners the stations are mounted, meters.
    pub station_inset_m: f64,
    pub station_height_m: f64,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            width_m: 3.0,
            depth_m: 3.0,
            station_inset_m: 0.6,
            station_height_m: 2.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseConfig {
    pub pos_sigma_m: f64,
    pub yaw_sigma_deg: f64,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            pos_sigma_m: 0.0012,
            yaw_sigma_deg: 0.35,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub room: RoomConfig,
    pub motion: MotionConfig,
    pub noise: NoiseConfig,
}

// ── The rig ───────────────────────────────────────────────────────────────────

struct RigState {
    epoch: u32,
    rng: StdRng,
}

/// Simulated pose source. Thread-safe: the backend polls it from both its
/// poller and diagnostic threads.
pub struct SimulatedRig {
    cfg: RigConfig,
    scenario: ScenarioConfig,
    started: Instant,
    online: AtomicBool,
    init_failures_left: AtomicU32,
    pos_noise: Normal<f64>,
    yaw_noise: Normal<f64>,
    state: Mutex<RigState>,
}

impl SimulatedRig {
    pub fn new(cfg: RigConfig, scenario: ScenarioConfig) -> Self {
        let init_failures = if scenario.has(ScenarioType::FlakyInit) {
            scenario.init_failures
        } else {
            0
        };
        // max() against the floor also scrubs NaN, so the sigma is always a
        // valid Normal parameter.
        let sigma_scale = scenario.noise_multiplier();
        let pos_sigma = (cfg.noise.pos_sigma_m * sigma_scale).abs().max(1e-12);
        let yaw_sigma = (cfg.noise.yaw_sigma_deg * sigma_scale).abs().max(1e-12);
        let pos_noise = Normal::new(0.0, pos_sigma).expect("positive finite sigma");
        let yaw_noise = Normal::new(0.0, yaw_sigma).expect("positive finite sigma");
        Self {
            cfg,
            scenario,
            started: Instant::now(),
            online: AtomicBool::new(false),
            init_failures_left: AtomicU32::new(init_failures),
            pos_noise,
            yaw_noise,
            state: Mutex::new(RigState {
                epoch: 0,
                rng: StdRng::seed_from_u64(0x11C0),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RigConfig::default(), ScenarioConfig::default())
    }

    /// Seconds of simulated time elapsed since construction.
    pub fn elapsed_s(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn station_poses(&self) -> [(String, Vec3, Mat3); 2] {
        let room = &self.cfg.room;
        let half_w = room.width_m / 2.0 + room.station_inset_m;
        let half_d = room.depth_m / 2.0 + room.station_inset_m;

        let height_a = if self.scenario.has(ScenarioType::LowMountA) {
            self.scenario.low_mount_height_m
        } else {
            room.station_height_m
        };
        let pos_a = Vec3::new(-half_w, -half_d, height_a);
        let pos_b = Vec3::new(half_w, half_d, room.station_height_m);

        let aim = |pos: Vec3, yaw_offset: f64| {
            let yaw = (-pos.y).atan2(-pos.x).to_degrees() + yaw_offset;
            let horiz = (pos.x * pos.x + pos.y * pos.y).sqrt();
            // Tilt toward waist height at the room center.
            let pitch = (1.0 - pos.z).atan2(horiz.max(1e-6)).to_degrees();
            Mat3::aimed(yaw, pitch)
        };

        let misaim = if self.scenario.has(ScenarioType::MisaimB) {
            self.scenario.misaim_yaw_offset_deg
        } else {
            0.0
        };

        [
            (STATION_A_SERIAL.to_string(), pos_a, aim(pos_a, 0.0)),
            (STATION_B_SERIAL.to_string(), pos_b, aim(pos_b, misaim)),
        ]
    }

    fn body_device(
        &self,
        index: u32,
        class: DeviceClass,
        model: &str,
        serial: &str,
        pos: Vec3,
        yaw_deg: f64,
        dropped: bool,
        state: &mut RigState,
    ) -> DeviceInfo {
        let noisy_pos = Vec3::new(
            pos.x + self.pos_noise.sample(&mut state.rng),
            pos.y + self.pos_noise.sample(&mut state.rng),
            pos.z + self.pos_noise.sample(&mut state.rng),
        );
        let noisy_yaw = yaw_deg + self.yaw_noise.sample(&mut state.rng);
        DeviceInfo {
            index,
            class,
            model: model.to_string(),
            serial: serial.to_string(),
            connected: true,
            pose: Some(Pose {
                position: noisy_pos,
                rotation: Mat3::aimed(noisy_yaw, 0.0),
                valid: true,
                tracking_result: if dropped {
                    TRACKING_RESULT_OUT_OF_RANGE
                } else {
                    TRACKING_RESULT_RUNNING_OK
                },
            }),
        }
    }
}

impl PoseSource for SimulatedRig {
    fn init(&self) -> Result<(), AdapterError> {
        if self.online.load(Ordering::Acquire) {
            return Ok(());
        }
        let left = self.init_failures_left.load(Ordering::Acquire);
        if left > 0 {
            self.init_failures_left.store(left - 1, Ordering::Release);
            return Err(AdapterError::RuntimeUnavailable(
                "simulated runtime still starting".to_string(),
            ));
        }
        self.online.store(true, Ordering::Release);
        debug!("simulated rig online");
        Ok(())
    }

    fn shutdown(&self) {
        self.online.store(false, Ordering::Release);
    }

    fn enumerate(&self) -> Result<Vec<DeviceInfo>, AdapterError> {
        if !self.online.load(Ordering::Acquire) {
            return Err(AdapterError::Poll("simulated runtime is offline".to_string()));
        }
        let t = self.elapsed_s();
        let user = user_sample(t, &self.cfg.motion);

        let mut state = self.state.lock().expect("rig state lock");
        state.epoch = state.epoch.wrapping_add(1);
        let epoch = state.epoch;

        let mut devices = Vec::with_capacity(6);

        // HMD
        let squat = self.cfg.motion.squat_depth * user.crouch;
        let hmd_z = 1.70 * (1.0 - squat);
        devices.push(self.body_device(
            0,
            DeviceClass::Hmd,
            "Coach Sim HMD",
            HMD_SERIAL,
            Vec3::new(user.center.x, user.center.y, hmd_z),
            user.yaw_deg,
            false,
            &mut state,
        ));

        // Stations report rock-steady poses.
        for (i, (serial, pos, rot)) in self.station_poses().into_iter().enumerate() {
            devices.push(DeviceInfo {
                index: 1 + i as u32,
                class: DeviceClass::TrackingReference,
                model: "Coach Sim Base".to_string(),
                serial,
                connected: true,
                pose: Some(Pose {
                    position: pos,
                    rotation: rot,
                    valid: true,
                    tracking_result: TRACKING_RESULT_RUNNING_OK,
                }),
            });
        }

        // Body trackers ride on the user: waist plus both feet, the feet
        // offset sideways from the facing direction.
        let yaw_rad = user.yaw_deg.to_radians();
        let side = Vec2::new(-yaw_rad.sin(), yaw_rad.cos());
        let foot = |sign: f64| {
            Vec3::new(
                user.center.x + side.x * 0.14 * sign,
                user.center.y + side.y * 0.14 * sign,
                0.08,
            )
        };
        let waist_pos = Vec3::new(user.center.x, user.center.y, 0.98 * (1.0 - squat));

        let trackers = [
            (3u32, LEFT_FOOT_SERIAL, foot(1.0)),
            (4u32, RIGHT_FOOT_SERIAL, foot(-1.0)),
            (5u32, WAIST_SERIAL, waist_pos),
        ];
        for (index, serial, pos) in trackers {
            let dropped = self.scenario.is_dropped(serial, epoch, user.yaw_deg);
            devices.push(self.body_device(
                index,
                DeviceClass::GenericTracker,
                "Coach Sim Tracker",
                serial,
                pos,
                user.yaw_deg,
                dropped,
                &mut state,
            ));
        }

        Ok(devices)
    }

    fn play_area(&self) -> PlayArea {
        if self.scenario.has(ScenarioType::NoChaperone) {
            return PlayArea::default_square();
        }
        let half_w = self.cfg.room.width_m / 2.0;
        let half_d = self.cfg.room.depth_m / 2.0;
        PlayArea {
            corners: vec![
                Vec2::new(-half_w, -half_d),
                Vec2::new(half_w, -half_d),
                Vec2::new(half_w, half_d),
                Vec2::new(-half_w, half_d),
            ],
            source: PlayAreaSource::Chaperone,
            warning: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn online_rig(scenario: ScenarioConfig) -> SimulatedRig {
        let rig = SimulatedRig::new(RigConfig::default(), scenario);
        rig.init().unwrap();
        rig
    }

    #[test]
    fn enumerates_a_full_rig() {
        let rig = online_rig(ScenarioConfig::default());
        let devices = rig.enumerate().unwrap();
        assert_eq!(devices.len(), 6);
        let count = |class: DeviceClass| devices.iter().filter(|d| d.class == class).count();
        assert_eq!(count(DeviceClass::Hmd), 1);
        assert_eq!(count(DeviceClass::TrackingReference), 2);
        assert_eq!(count(DeviceClass::GenericTracker), 3);
        assert!(devices.iter().all(|d| d.connected && d.pose.is_some()));
        assert!(devices
            .iter()
            .all(|d| d.pose.as_ref().unwrap().is_ok()));
    }

    #[test]
    fn stations_aim_into_the_room() {
        let rig = online_rig(ScenarioConfig::default());
        let devices = rig.enumerate().unwrap();
        for d in devices
            .iter()
            .filter(|d| d.class == DeviceClass::TrackingReference)
        {
            let pose = d.pose.as_ref().unwrap();
            // Forward should point back toward the origin-ish and downward.
            let f = pose.rotation.forward();
            let toward_center = -(pose.position.x * f.x + pose.position.y * f.y);
            assert!(toward_center > 0.0, "{} aims outward", d.serial);
            assert!(f.z < 0.0, "{} does not tilt down", d.serial);
        }
    }

    #[test]
    fn init_is_idempotent_and_shutdown_resets() {
        let rig = SimulatedRig::with_defaults();
        rig.init().unwrap();
        rig.init().unwrap();
        assert!(rig.enumerate().is_ok());
        rig.shutdown();
        rig.shutdown();
        assert!(rig.enumerate().is_err());
        rig.init().unwrap();
        assert!(rig.enumerate().is_ok());
    }

    #[test]
    fn flaky_init_fails_then_recovers() {
        let mut scenario = scenarios::preset_occlusion();
        scenario.active.push(ScenarioType::FlakyInit);
        scenario.init_failures = 2;
        let rig = SimulatedRig::new(RigConfig::default(), scenario);
        assert!(rig.init().is_err());
        assert!(rig.init().is_err());
        assert!(rig.init().is_ok());
    }

    #[test]
    fn periodic_dropout_marks_affected_trackers_not_ok() {
        let mut scenario = scenarios::preset_dropout();
        scenario.dropout_period_epochs = 2;
        scenario.dropout_duration_epochs = 1;
        let rig = online_rig(scenario);
        // Epochs count from 1; with period 2 / duration 1 the even epochs
        // drop, so the second enumerate is inside a dropout.
        let _ = rig.enumerate().unwrap();
        let devices = rig.enumerate().unwrap();
        let waist = devices.iter().find(|d| d.serial == WAIST_SERIAL).unwrap();
        assert!(!waist.pose.as_ref().unwrap().is_ok());
        let right = devices
            .iter()
            .find(|d| d.serial == RIGHT_FOOT_SERIAL)
            .unwrap();
        assert!(right.pose.as_ref().unwrap().is_ok());
    }

    #[test]
    fn no_chaperone_scenario_falls_back_to_default_square() {
        let rig = online_rig(scenarios::preset_no_chaperone());
        let pa = rig.play_area();
        assert_eq!(pa.source, PlayAreaSource::Default);
        assert!(pa.warning.is_some());
    }

    #[test]
    fn low_mount_scenario_lowers_station_a_only() {
        let rig = online_rig(scenarios::preset_low_mount());
        let devices = rig.enumerate().unwrap();
        let station = |serial: &str| {
            devices
                .iter()
                .find(|d| d.serial == serial)
                .and_then(|d| d.pose.as_ref())
                .unwrap()
                .position
                .z
        };
        assert!((station(STATION_A_SERIAL) - 1.5).abs() < 1e-9);
        assert!((station(STATION_B_SERIAL) - 2.2).abs() < 1e-9);
    }
}
