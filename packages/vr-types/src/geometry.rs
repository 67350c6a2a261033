//! Geometry primitives shared by the backend and the rig simulator.
//!
//! All math is f64 and in meters/degrees. The tracking frame is the standing
//! universe: Z up, XY is the floor plane, and a device's forward axis is the
//! negated third column of its rotation matrix (−R·ẑ).

use serde::{Deserialize, Serialize};

// ── Vectors ───────────────────────────────────────────────────────────────────

/// 3D vector (meters)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn sub(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn add(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn scale(&self, s: f64) -> Vec3 {
        Vec3::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn length(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector, or zero when the length is degenerate.
    pub fn normalized(&self) -> Vec3 {
        let len = self.length();
        if len <= 1e-9 {
            return Vec3::default();
        }
        self.scale(1.0 / len)
    }

    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }
}

/// 2D point in the floor plane (meters)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

// ── Rotations ─────────────────────────────────────────────────────────────────

/// 3×3 row-major rotation matrix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mat3(pub [[f64; 3]; 3]);

impl Default for Mat3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat3 {
    pub const IDENTITY: Mat3 = Mat3([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);

    pub fn transpose(&self) -> Mat3 {
        let m = &self.0;
        Mat3([
            [m[0][0], m[1][0], m[2][0]],
            [m[0][1], m[1][1], m[2][1]],
            [m[0][2], m[1][2], m[2][2]],
        ])
    }

    pub fn mul_vec3(&self, v: Vec3) -> Vec3 {
        let m = &self.0;
        Vec3::new(
            m[0][0] * v.x + m[0][1] * v.y + m[0][2] * v.z,
            m[1][0] * v.x + m[1][1] * v.y + m[1][2] * v.z,
            m[2][0] * v.x + m[2][1] * v.y + m[2][2] * v.z,
        )
    }

    /// Device forward axis: −R·ẑ (the tracked-device convention).
    pub fn forward(&self) -> Vec3 {
        let m = &self.0;
        Vec3::new(-m[0][2], -m[1][2], -m[2][2])
    }

    /// Yaw of the forward axis in the floor plane, degrees.
    pub fn yaw_deg(&self) -> f64 {
        let f = self.forward();
        f.y.atan2(f.x).to_degrees()
    }

    /// Pitch of the forward axis above the floor plane, degrees.
    pub fn pitch_deg(&self) -> f64 {
        let f = self.forward();
        f.z.atan2((f.x * f.x + f.y * f.y).sqrt()).to_degrees()
    }

    /// Build the rotation whose forward axis points along the given yaw and
    /// pitch, with local up kept as close to world +Z as the pitch allows.
    /// Degenerate for |pitch| = 90°, which the rig never produces.
    pub fn aimed(yaw_deg: f64, pitch_deg: f64) -> Mat3 {
        let (yaw, pitch) = (yaw_deg.to_radians(), pitch_deg.to_radians());
        let forward = Vec3::new(
            pitch.cos() * yaw.cos(),
            pitch.cos() * yaw.sin(),
            pitch.sin(),
        );
        let world_up = Vec3::new(0.0, 0.0, 1.0);
        let right = forward.cross(&world_up).normalized();
        let z_col = forward.scale(-1.0);
        let y_col = z_col.cross(&right);
        Mat3([
            [right.x, y_col.x, z_col.x],
            [right.y, y_col.y, z_col.y],
            [right.z, y_col.z, z_col.z],
        ])
    }
}

// ── Angles ────────────────────────────────────────────────────────────────────

/// Wrap an angle into (−180, 180].
pub fn wrap_deg(a: f64) -> f64 {
    let mut w = (a + 180.0) % 360.0;
    if w <= 0.0 {
        w += 360.0;
    }
    w - 180.0
}

/// Shortest signed difference a − b in degrees.
pub fn angle_diff_deg(a: f64, b: f64) -> f64 {
    wrap_deg(a - b)
}

/// Direction of the point in the rotation's local frame, where local forward
/// is −Z, right is +X and up is +Y. Returns (yaw_deg, pitch_deg).
pub fn local_yaw_pitch(rot: &Mat3, origin: &Vec3, target: &Vec3) -> (f64, f64) {
    let dir = target.sub(origin).normalized();
    let local = rot.transpose().mul_vec3(dir);
    let yaw = local.x.atan2(-local.z).to_degrees();
    let pitch = local.y.atan2(-local.z).to_degrees();
    (yaw, pitch)
}

// ── Polygons ──────────────────────────────────────────────────────────────────

/// Even-odd ray cast; ties on horizontal edges resolved by the strict
/// `(y0 > y) != (y1 > y)` rule.
pub fn point_in_polygon(pt: Vec2, poly: &[Vec2]) -> bool {
    let mut inside = false;
    let n = poly.len();
    for i in 0..n {
        let p0 = poly[i];
        let p1 = poly[(i + 1) % n];
        if (p0.y > pt.y) != (p1.y > pt.y)
            && pt.x < (p1.x - p0.x) * (pt.y - p0.y) / (p1.y - p0.y + 1e-12) + p0.x
        {
            inside = !inside;
        }
    }
    inside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Vec2> {
        vec![
            Vec2::new(-1.0, -1.0),
            Vec2::new(1.0, -1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(-1.0, 1.0),
        ]
    }

    #[test]
    fn wrap_deg_stays_in_half_open_range() {
        assert_eq!(wrap_deg(0.0), 0.0);
        assert_eq!(wrap_deg(180.0), 180.0);
        assert_eq!(wrap_deg(-180.0), 180.0);
        assert_eq!(wrap_deg(540.0), 180.0);
        assert!((wrap_deg(350.0) + 10.0).abs() < 1e-12);
        assert!((wrap_deg(-350.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn point_in_polygon_square() {
        let poly = square();
        assert!(point_in_polygon(Vec2::new(0.0, 0.0), &poly));
        assert!(point_in_polygon(Vec2::new(0.99, -0.99), &poly));
        assert!(!point_in_polygon(Vec2::new(1.5, 0.0), &poly));
        assert!(!point_in_polygon(Vec2::new(0.0, -1.5), &poly));
    }

    #[test]
    fn point_in_polygon_concave() {
        // L-shape: the notch at the top right is outside.
        let poly = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 2.0),
            Vec2::new(0.0, 2.0),
        ];
        assert!(point_in_polygon(Vec2::new(0.5, 1.5), &poly));
        assert!(point_in_polygon(Vec2::new(1.5, 0.5), &poly));
        assert!(!point_in_polygon(Vec2::new(1.5, 1.5), &poly));
    }

    #[test]
    fn aimed_round_trips_yaw_pitch() {
        for &(yaw, pitch) in &[(0.0, 0.0), (45.0, -20.0), (-135.0, 30.0), (170.0, -45.0)] {
            let rot = Mat3::aimed(yaw, pitch);
            assert!((wrap_deg(rot.yaw_deg() - yaw)).abs() < 1e-9, "yaw {yaw}");
            assert!((rot.pitch_deg() - pitch).abs() < 1e-9, "pitch {pitch}");
        }
    }

    #[test]
    fn aimed_columns_are_orthonormal() {
        let rot = Mat3::aimed(30.0, -25.0);
        let t = rot.transpose();
        for i in 0..3 {
            let col = Vec3::new(t.0[i][0], t.0[i][1], t.0[i][2]);
            assert!((col.length() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn local_yaw_pitch_is_zero_along_forward() {
        let rot = Mat3::aimed(45.0, -20.0);
        let origin = Vec3::new(-1.8, -1.8, 2.2);
        let target = origin.add(&rot.forward().scale(3.0));
        let (yaw, pitch) = local_yaw_pitch(&rot, &origin, &target);
        assert!(yaw.abs() < 1e-9);
        assert!(pitch.abs() < 1e-9);
    }

    #[test]
    fn local_yaw_pitch_sees_lateral_offsets() {
        // Station at origin aimed along +X: a target toward +Y sits to its
        // left (negative local yaw), a raised target has positive pitch.
        let rot = Mat3::aimed(0.0, 0.0);
        let origin = Vec3::default();
        let (yaw, _) = local_yaw_pitch(&rot, &origin, &Vec3::new(1.0, 1.0, 0.0));
        assert!((yaw + 45.0).abs() < 1e-9);
        let (_, pitch) = local_yaw_pitch(&rot, &origin, &Vec3::new(1.0, 0.0, 1.0));
        assert!((pitch - 45.0).abs() < 1e-9);
    }
}
