//! # coverage
//!
//! Geometric coverage of the play area by up to two base stations.
//!
//! The model is deliberately heuristic: a station "sees" a point when the
//! point sits inside a conservative FOV cone (|yaw| ≤ 60°, |pitch| ≤ 45° in
//! the station-local frame). True optical visibility (occluders, range
//! falloff) is out of scope. The play area is rasterized at foot and waist
//! height, each cell counts visible stations, and a center-weighted average
//! yields a single 0–100 score.

use serde::{Deserialize, Serialize};
use vr_types::geometry::{local_yaw_pitch, point_in_polygon, Vec2, Vec3};
use vr_types::{PlayArea, StationPose};

// ── Parameters ────────────────────────────────────────────────────────────────

/// Tunables for the rasterizer and the FOV cone. Defaults match the values
/// the renderer was calibrated against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverageParams {
    pub grid_step_m: f64,
    pub foot_z_m: f64,
    pub waist_z_m: f64,
    pub fov_yaw_deg: f64,
    pub fov_pitch_deg: f64,
}

impl Default for CoverageParams {
    fn default() -> Self {
        Self {
            grid_step_m: 0.10,
            foot_z_m: 0.15,
            waist_z_m: 1.00,
            fov_yaw_deg: 60.0,
            fov_pitch_deg: 45.0,
        }
    }
}

// ── Results ───────────────────────────────────────────────────────────────────

/// Rasterized visibility grid. Row-major indexing: `idx = yi * w + xi`.
/// Cells outside the polygon always score 0 at both heights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageResult {
    pub grid_origin: Vec2,
    pub grid_step: f64,
    pub w: usize,
    pub h: usize,
    pub inside_mask: Vec<bool>,
    pub score_foot: Vec<u8>,
    pub score_waist: Vec<u8>,
    pub overlap_pct_foot: f64,
    pub overlap_pct_waist: f64,
    pub overall_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_warning: Option<String>,
}

/// The compact slice of a coverage result that gets persisted into session
/// artifacts and shown in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub overlap_pct_foot: f64,
    pub overlap_pct_waist: f64,
    pub overall_score: f64,
}

impl CoverageResult {
    pub fn summary(&self) -> CoverageSummary {
        CoverageSummary {
            overlap_pct_foot: self.overlap_pct_foot,
            overlap_pct_waist: self.overlap_pct_waist,
            overall_score: self.overall_score,
        }
    }
}

// ── Station FOV checks ────────────────────────────────────────────────────────

/// Whether the station's conservative FOV cone contains the point, plus the
/// minimum remaining angular headroom to the cone edge. Negative margin
/// means outside.
pub fn station_sees_point(
    station: &StationPose,
    point: Vec3,
    params: &CoverageParams,
) -> (bool, f64) {
    let (yaw, pitch) = local_yaw_pitch(&station.rotation, &station.position, &point);
    let margin = (params.fov_yaw_deg - yaw.abs()).min(params.fov_pitch_deg - pitch.abs());
    (margin >= 0.0, margin)
}

/// Forward yaw/pitch of a station in world terms, degrees.
pub fn station_yaw_pitch_deg(station: &StationPose) -> (f64, f64) {
    (station.rotation.yaw_deg(), station.rotation.pitch_deg())
}

/// Heuristic mutual-visibility check. Base Station 1.0 pairs often need
/// optical sync, so a pair that cannot see each other gets a warning string
/// carrying both margins. Requires exactly two stations.
pub fn station_to_station_visibility(
    stations: &[StationPose],
    params: &CoverageParams,
) -> Option<String> {
    if stations.len() != 2 {
        return None;
    }
    let (a, b) = (&stations[0], &stations[1]);
    let (a_sees, a_margin) = station_sees_point(a, b.position, params);
    let (b_sees, b_margin) = station_sees_point(b, a.position, params);
    if a_sees && b_sees {
        return None;
    }
    Some(format!(
        "Heuristic sync check: Station A/B may not have line-of-sight to each other. \
         Base Station 1.0 often requires optical sync; consider re-aiming or using a sync cable. \
         (A→B margin {a_margin:.1}°, B→A margin {b_margin:.1}°)"
    ))
}

// ── Rasterizer ────────────────────────────────────────────────────────────────

/// Rasterize the play area and score every cell. Always defined when the
/// polygon has at least three corners.
pub fn compute_coverage(
    play_area: &PlayArea,
    stations: &[StationPose],
    params: &CoverageParams,
) -> CoverageResult {
    let corners = &play_area.corners;
    let min_x = corners.iter().map(|c| c.x).fold(f64::INFINITY, f64::min);
    let max_x = corners.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|c| c.y).fold(f64::INFINITY, f64::min);
    let max_y = corners.iter().map(|c| c.y).fold(f64::NEG_INFINITY, f64::max);

    let step = params.grid_step_m;
    let w = (((max_x - min_x) / step).ceil() as usize + 1).max(1);
    let h = (((max_y - min_y) / step).ceil() as usize + 1).max(1);

    let mut inside_mask = Vec::with_capacity(w * h);
    let mut score_foot = Vec::with_capacity(w * h);
    let mut score_waist = Vec::with_capacity(w * h);

    let mut inside_count = 0u32;
    let mut overlap2_foot = 0u32;
    let mut overlap2_waist = 0u32;

    let centroid = play_area.centroid();
    let max_r = corners
        .iter()
        .map(|c| ((c.x - centroid.x).powi(2) + (c.y - centroid.y).powi(2)).sqrt())
        .fold(1e-6_f64, f64::max);

    let mut weighted_sum = 0.0;
    let mut weighted_max = 0.0;

    for yi in 0..h {
        let y = min_y + yi as f64 * step;
        for xi in 0..w {
            let x = min_x + xi as f64 * step;
            let in_poly = point_in_polygon(Vec2::new(x, y), corners);
            inside_mask.push(in_poly);
            if !in_poly {
                score_foot.push(0);
                score_waist.push(0);
                continue;
            }
            inside_count += 1;

            let foot_pt = Vec3::new(x, y, params.foot_z_m);
            let waist_pt = Vec3::new(x, y, params.waist_z_m);

            let mut f_vis = 0u8;
            let mut w_vis = 0u8;
            for s in stations {
                if station_sees_point(s, foot_pt, params).0 {
                    f_vis += 1;
                }
                if station_sees_point(s, waist_pt, params).0 {
                    w_vis += 1;
                }
            }
            let f_vis = f_vis.min(2);
            let w_vis = w_vis.min(2);
            score_foot.push(f_vis);
            score_waist.push(w_vis);

            if f_vis == 2 {
                overlap2_foot += 1;
            }
            if w_vis == 2 {
                overlap2_waist += 1;
            }

            // Weighting heuristic: trackers spend most time near the center,
            // but edges are where occlusion bites; foot coverage matters more
            // than waist for full-body stability.
            let r = ((x - centroid.x).powi(2) + (y - centroid.y).powi(2)).sqrt() / max_r;
            let center_w = (1.0 - r.min(1.0)).powi(2);
            let edge_w = 1.0 - center_w;
            let cell_w = 0.6 * (0.7 * center_w + 0.3 * edge_w) + 0.4 * (0.9 * center_w + 0.1 * edge_w);

            let cell_score = 0.6 * (f_vis as f64 / 2.0) + 0.4 * (w_vis as f64 / 2.0);
            weighted_sum += cell_w * cell_score;
            weighted_max += cell_w;
        }
    }

    let pct = |n: u32| {
        if inside_count == 0 {
            0.0
        } else {
            100.0 * n as f64 / inside_count as f64
        }
    };
    let overall = if weighted_max <= 1e-9 {
        0.0
    } else {
        100.0 * weighted_sum / weighted_max
    };

    CoverageResult {
        grid_origin: Vec2::new(min_x, min_y),
        grid_step: step,
        w,
        h,
        inside_mask,
        score_foot,
        score_waist,
        overlap_pct_foot: pct(overlap2_foot),
        overlap_pct_waist: pct(overlap2_waist),
        overall_score: overall,
        sync_warning: station_to_station_visibility(stations, params),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vr_types::geometry::Mat3;
    use vr_types::PlayAreaSource;

    fn square_room() -> PlayArea {
        PlayArea {
            corners: vec![
                Vec2::new(-1.0, -1.0),
                Vec2::new(1.0, -1.0),
                Vec2::new(1.0, 1.0),
                Vec2::new(-1.0, 1.0),
            ],
            source: PlayAreaSource::Chaperone,
            warning: None,
        }
    }

    fn station(serial: &str, pos: Vec3, aim_at: Vec2, pitch_deg: f64) -> StationPose {
        let yaw = (aim_at.y - pos.y).atan2(aim_at.x - pos.x).to_degrees();
        StationPose {
            serial: serial.to_string(),
            position: pos,
            rotation: Mat3::aimed(yaw, pitch_deg),
        }
    }

    fn good_pair() -> Vec<StationPose> {
        vec![
            station("LHB-A", Vec3::new(-1.8, -1.8, 2.2), Vec2::new(0.0, 0.0), -20.0),
            station("LHB-B", Vec3::new(1.8, 1.8, 2.2), Vec2::new(0.0, 0.0), -20.0),
        ]
    }

    #[test]
    fn square_room_centered_stations_scores_high() {
        let cov = compute_coverage(&square_room(), &good_pair(), &CoverageParams::default());
        assert!(cov.overlap_pct_foot > 80.0, "foot overlap {}", cov.overlap_pct_foot);
        assert!(cov.overall_score > 80.0, "overall {}", cov.overall_score);
        assert!(cov.sync_warning.is_none());
    }

    #[test]
    fn station_facing_away_triggers_sync_warning_and_drops_overlap() {
        let mut stations = good_pair();
        // Station B rotated 180°: aims away from the room and from Station A.
        let flipped_yaw = stations[1].rotation.yaw_deg() + 180.0;
        stations[1].rotation = Mat3::aimed(flipped_yaw, -20.0);

        let good = compute_coverage(&square_room(), &good_pair(), &CoverageParams::default());
        let bad = compute_coverage(&square_room(), &stations, &CoverageParams::default());
        assert!(bad.sync_warning.is_some());
        assert!(bad.overlap_pct_foot < good.overlap_pct_foot - 40.0);
    }

    #[test]
    fn single_station_has_no_overlap_and_no_sync_warning() {
        let stations = vec![good_pair().remove(0)];
        let cov = compute_coverage(&square_room(), &stations, &CoverageParams::default());
        assert_eq!(cov.overlap_pct_foot, 0.0);
        assert_eq!(cov.overlap_pct_waist, 0.0);
        assert!(cov.sync_warning.is_none());
    }

    #[test]
    fn outside_cells_score_zero() {
        // Diamond inside the bounding box leaves the box corners outside.
        let diamond = PlayArea {
            corners: vec![
                Vec2::new(0.0, -1.0),
                Vec2::new(1.0, 0.0),
                Vec2::new(0.0, 1.0),
                Vec2::new(-1.0, 0.0),
            ],
            source: PlayAreaSource::Chaperone,
            warning: None,
        };
        let cov = compute_coverage(&diamond, &good_pair(), &CoverageParams::default());
        assert!(cov.inside_mask.iter().any(|&m| !m));
        for i in 0..cov.inside_mask.len() {
            if !cov.inside_mask[i] {
                assert_eq!(cov.score_foot[i], 0);
                assert_eq!(cov.score_waist[i], 0);
            }
        }
    }

    #[test]
    fn scores_and_percentages_stay_in_range() {
        for stations in [vec![], vec![good_pair().remove(1)], good_pair()] {
            let cov = compute_coverage(&square_room(), &stations, &CoverageParams::default());
            assert!((0.0..=100.0).contains(&cov.overlap_pct_foot));
            assert!((0.0..=100.0).contains(&cov.overlap_pct_waist));
            assert!((0.0..=100.0).contains(&cov.overall_score));
        }
    }

    #[test]
    fn default_square_grid_is_fully_inside() {
        let pa = PlayArea::default_square();
        let cov = compute_coverage(&pa, &good_pair(), &CoverageParams::default());
        assert_eq!(cov.w, 21);
        assert_eq!(cov.h, 21);
        assert!(cov.inside_mask.iter().all(|&m| m));
    }

    #[test]
    fn sync_warning_carries_both_margins() {
        let mut stations = good_pair();
        stations[1].rotation = Mat3::aimed(stations[1].rotation.yaw_deg() + 180.0, -20.0);
        let warning =
            station_to_station_visibility(&stations, &CoverageParams::default()).unwrap();
        assert!(warning.contains("A→B margin"));
        assert!(warning.contains("B→A margin"));
    }
}
