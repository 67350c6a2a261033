//! Injectable fault scenarios for the rig simulator.
//!
//! Each scenario reproduces a real-world setup problem or failure mode so
//! the coach's detection paths can be exercised without hardware. All
//! scenarios are recoverable; none corrupts rig state.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScenarioType {
    /// Drop a tracker whenever the user's yaw sits inside a band
    /// (body self-occlusion toward one station).
    YawBandOcclusion,
    /// Periodically silence trackers for a few epochs (radio dropout).
    PeriodicDropout,
    /// Mount Station A well below the recommended height.
    LowMountA,
    /// Aim Station B away from the play-area center.
    MisaimB,
    /// Chaperone bounds unreadable: the rig reports the default square.
    NoChaperone,
    /// 4× pose noise (reflective surfaces, bad sync).
    RoughNoise,
    /// Fail the first few `init()` calls (runtime still starting up).
    FlakyInit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub active: Vec<ScenarioType>,
    /// Center of the occluded HMD-yaw band, degrees.
    pub occlusion_yaw_center_deg: f64,
    /// Half-width of the occluded band, degrees.
    pub occlusion_yaw_halfwidth_deg: f64,
    /// Serials hit by YawBandOcclusion / PeriodicDropout.
    pub affected_serials: Vec<String>,
    /// PeriodicDropout: epochs down per period.
    pub dropout_duration_epochs: u32,
    /// PeriodicDropout: epochs between dropout starts.
    pub dropout_period_epochs: u32,
    /// LowMountA: mount height override, meters.
    pub low_mount_height_m: f64,
    /// MisaimB: yaw offset away from the centroid aim, degrees.
    pub misaim_yaw_offset_deg: f64,
    /// FlakyInit: number of failing init attempts before success.
    pub init_failures: u32,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            active: vec![],
            occlusion_yaw_center_deg: 180.0,
            occlusion_yaw_halfwidth_deg: 25.0,
            affected_serials: vec![crate::WAIST_SERIAL.to_string()],
            dropout_duration_epochs: 8,
            dropout_period_epochs: 120,
            low_mount_height_m: 1.5,
            misaim_yaw_offset_deg: 150.0,
            init_failures: 3,
        }
    }
}

impl ScenarioConfig {
    pub fn has(&self, s: ScenarioType) -> bool {
        self.active.contains(&s)
    }

    pub fn is_dropped(&self, serial: &str, epoch: u32, user_yaw_deg: f64) -> bool {
        if !self.affected_serials.iter().any(|s| s == serial) {
            return false;
        }
        if self.has(ScenarioType::PeriodicDropout)
            && epoch % self.dropout_period_epochs.max(1) < self.dropout_duration_epochs
        {
            return true;
        }
        if self.has(ScenarioType::YawBandOcclusion) {
            let delta =
                vr_types::geometry::angle_diff_deg(user_yaw_deg, self.occlusion_yaw_center_deg);
            if delta.abs() <= self.occlusion_yaw_halfwidth_deg {
                return true;
            }
        }
        false
    }

    pub fn noise_multiplier(&self) -> f64 {
        if self.has(ScenarioType::RoughNoise) {
            4.0
        } else {
            1.0
        }
    }
}

// ── Presets ───────────────────────────────────────────────────────────────────

pub fn preset_occlusion() -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::YawBandOcclusion],
        ..Default::default()
    }
}

pub fn preset_dropout() -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::PeriodicDropout],
        affected_serials: vec![
            crate::LEFT_FOOT_SERIAL.to_string(),
            crate::WAIST_SERIAL.to_string(),
        ],
        ..Default::default()
    }
}

pub fn preset_low_mount() -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::LowMountA],
        ..Default::default()
    }
}

pub fn preset_misaim() -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::MisaimB, ScenarioType::RoughNoise],
        ..Default::default()
    }
}

pub fn preset_no_chaperone() -> ScenarioConfig {
    ScenarioConfig {
        active: vec![ScenarioType::NoChaperone],
        ..Default::default()
    }
}

pub fn preset_by_name(name: &str) -> Option<ScenarioConfig> {
    match name {
        "default" => Some(ScenarioConfig::default()),
        "occlusion" => Some(preset_occlusion()),
        "dropout" => Some(preset_dropout()),
        "low_mount" => Some(preset_low_mount()),
        "misaim" => Some(preset_misaim()),
        "no_chaperone" => Some(preset_no_chaperone()),
        _ => None,
    }
}
