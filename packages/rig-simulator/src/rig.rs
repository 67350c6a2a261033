//! User motion script for the simulated rig.
//!
//! The virtual user performs the coach's 60-second diagnostic protocol in a
//! loop: stand still, slow 360° turn, squats, side-steps, then face each
//! station. Timing matches the stage labels the diagnostic thread reports.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use vr_types::geometry::Vec2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionConfig {
    /// Protocol length before the script loops, seconds.
    pub cycle_s: f64,
    /// Peak lateral displacement during the side-step phase, meters.
    pub step_amplitude_m: f64,
    /// Squat depth as a fraction of standing height.
    pub squat_depth: f64,
    /// Yaw the user holds while "facing Station A", degrees.
    pub face_a_yaw_deg: f64,
    /// Yaw the user holds while "facing Station B", degrees.
    pub face_b_yaw_deg: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            cycle_s: 60.0,
            step_amplitude_m: 0.5,
            squat_depth: 0.35,
            face_a_yaw_deg: -135.0,
            face_b_yaw_deg: 45.0,
        }
    }
}

/// Instantaneous user state: body center in the floor plane, facing, and a
/// 0..1 crouch factor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserSample {
    pub center: Vec2,
    pub yaw_deg: f64,
    pub crouch: f64,
}

pub fn user_sample(t: f64, motion: &MotionConfig) -> UserSample {
    let t = t.rem_euclid(motion.cycle_s.max(1.0));
    let mut center = Vec2::new(0.0, 0.0);
    let mut yaw = 0.0;
    let mut crouch = 0.0;

    if t < 10.0 {
        // stand still at center
    } else if t < 25.0 {
        // slow full turn
        yaw = (t - 10.0) / 15.0 * 360.0;
    } else if t < 35.0 {
        // two squat cycles of 5 s each
        crouch = 0.5 * (1.0 - (TAU * (t - 25.0) / 5.0).cos());
    } else if t < 50.0 {
        // side-to-side steps, 5 s per round trip
        center.x = motion.step_amplitude_m * (TAU * (t - 35.0) / 5.0).sin();
    } else if t < 55.0 {
        yaw = motion.face_a_yaw_deg;
    } else {
        yaw = motion.face_b_yaw_deg;
    }

    UserSample {
        center,
        yaw_deg: vr_types::geometry::wrap_deg(yaw),
        crouch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_phases_match_the_protocol() {
        let m = MotionConfig::default();

        let standing = user_sample(5.0, &m);
        assert_eq!(standing.center, Vec2::new(0.0, 0.0));
        assert_eq!(standing.yaw_deg, 0.0);
        assert_eq!(standing.crouch, 0.0);

        // Mid-turn: half a revolution.
        let turning = user_sample(17.5, &m);
        assert!((turning.yaw_deg.abs() - 180.0).abs() < 1e-9);

        // Deepest squat at the half-cycle point.
        let squatting = user_sample(27.5, &m);
        assert!((squatting.crouch - 1.0).abs() < 1e-9);

        // Side-step peaks a quarter of the way into each 5 s round trip.
        let stepping = user_sample(36.25, &m);
        assert!((stepping.center.x - m.step_amplitude_m).abs() < 1e-9);

        assert_eq!(user_sample(52.0, &m).yaw_deg, m.face_a_yaw_deg);
        assert_eq!(user_sample(57.0, &m).yaw_deg, m.face_b_yaw_deg);
    }

    #[test]
    fn script_loops_after_the_cycle() {
        let m = MotionConfig::default();
        let a = user_sample(5.0, &m);
        let b = user_sample(65.0, &m);
        assert_eq!(a, b);
    }
}
