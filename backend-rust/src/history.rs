//! # history
//!
//! Read-only aggregation over saved diagnostic sessions: every tracked
//! position in every sample is binned into a play-area grid and scored by
//! its ok/bad ratio. Files that fail to decode are skipped, never fatal.

use serde::{Deserialize, Serialize};
use tracing::info;
use vr_types::geometry::{point_in_polygon, Vec2};
use vr_types::PlayArea;

use crate::storage::{list_sessions, load_session, AppPaths};

// ── Types ─────────────────────────────────────────────────────────────────────

/// Cellwise historical tracking quality. `score` is −1 for cells outside the
/// polygon, otherwise 0..100 (higher is better); inside cells with no data
/// sit at 50.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heatmap {
    pub origin: Vec2,
    pub step_m: f64,
    pub w: usize,
    pub h: usize,
    pub score: Vec<i32>,
    pub source: String,
}

/// Ingest totals across all readable session files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistorySummary {
    pub sessions: usize,
    pub samples: usize,
    pub points: usize,
    pub ok_points: usize,
    pub bad_points: usize,
}

// ── Aggregation ───────────────────────────────────────────────────────────────

/// Aggregate all saved sessions into a heatmap for the given play area.
/// Returns `None` when no session files exist.
pub fn compute_heatmap(
    paths: &AppPaths,
    play_area: &PlayArea,
    step_m: f64,
) -> Option<(Heatmap, HistorySummary)> {
    let files = list_sessions(paths);
    if files.is_empty() {
        return None;
    }

    let corners = &play_area.corners;
    let min_x = corners.iter().map(|c| c.x).fold(f64::INFINITY, f64::min);
    let max_x = corners.iter().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max);
    let min_y = corners.iter().map(|c| c.y).fold(f64::INFINITY, f64::min);
    let max_y = corners.iter().map(|c| c.y).fold(f64::NEG_INFINITY, f64::max);

    let w = ((((max_x - min_x) / step_m) as usize) + 1).max(1);
    let h = ((((max_y - min_y) / step_m) as usize) + 1).max(1);

    let mut ok = vec![0u32; w * h];
    let mut bad = vec![0u32; w * h];
    let mut inside = vec![false; w * h];
    for yi in 0..h {
        for xi in 0..w {
            let cx = min_x + (xi as f64 + 0.5) * step_m;
            let cy = min_y + (yi as f64 + 0.5) * step_m;
            inside[yi * w + xi] = point_in_polygon(Vec2::new(cx, cy), corners);
        }
    }

    let mut summary = HistorySummary::default();

    for path in &files {
        let Some(session) = load_session(path) else {
            continue;
        };
        summary.sessions += 1;
        summary.samples += session.samples.len();

        for sample in &session.samples {
            for tracker in sample.trackers.values() {
                let Some(pos) = tracker.pos else { continue };
                let xi = ((pos.x - min_x) / step_m).floor() as i64;
                let yi = ((pos.y - min_y) / step_m).floor() as i64;
                if xi < 0 || yi < 0 || xi >= w as i64 || yi >= h as i64 {
                    continue;
                }
                let idx = yi as usize * w + xi as usize;
                if !inside[idx] {
                    continue;
                }
                summary.points += 1;
                if tracker.ok {
                    ok[idx] += 1;
                    summary.ok_points += 1;
                } else {
                    bad[idx] += 1;
                    summary.bad_points += 1;
                }
            }
        }
    }

    let score: Vec<i32> = (0..w * h)
        .map(|i| {
            if !inside[i] {
                return -1;
            }
            let total = ok[i] + bad[i];
            if total == 0 {
                50
            } else {
                (100.0 * ok[i] as f64 / total as f64).round() as i32
            }
        })
        .collect();

    info!(
        sessions = summary.sessions,
        points = summary.points,
        "historical ingest: heatmap {}x{} rebuilt",
        w,
        h
    );

    Some((
        Heatmap {
            origin: Vec2::new(min_x, min_y),
            step_m,
            w,
            h,
            score,
            source: "historical_logs".to_string(),
        },
        summary,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::session::{SessionArtifact, SessionSample, TrackerSample};
    use crate::storage::{save_session, AppPaths};
    use vr_types::geometry::Vec3;
    use vr_types::PlayAreaSource;

    fn play_area() -> PlayArea {
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

    fn sample(t: f64, pos: Vec3, ok: bool) -> SessionSample {
        SessionSample {
            t_s: t,
            hmd_yaw_deg: None,
            trackers: BTreeMap::from([(
                "LHR-TRACK001".to_string(),
                TrackerSample {
                    pos: Some(pos),
                    yaw_deg: Some(0.0),
                    ok,
                },
            )]),
        }
    }

    fn artifact(timestamp: &str, samples: Vec<SessionSample>) -> SessionArtifact {
        SessionArtifact {
            timestamp: timestamp.to_string(),
            duration_s: 60.0,
            tracker_roles_by_serial: BTreeMap::from([(
                "LHR-TRACK001".to_string(),
                "Waist".to_string(),
            )]),
            stations: vec![],
            play_area: Some(play_area()),
            coverage_summary: None,
            samples,
        }
    }

    #[test]
    fn empty_store_yields_none() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::at(dir.path());
        paths.ensure_dirs().unwrap();
        assert!(compute_heatmap(&paths, &play_area(), 0.25).is_none());
    }

    #[test]
    fn scores_follow_ok_bad_ratio() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::at(dir.path());
        paths.ensure_dirs().unwrap();

        // One cell gets 3 ok + 1 bad, another only bad points.
        let good_pos = Vec3::new(0.1, 0.1, 1.0);
        let bad_pos = Vec3::new(-0.6, -0.6, 1.0);
        let samples = vec![
            sample(0.0, good_pos, true),
            sample(0.1, good_pos, true),
            sample(0.2, good_pos, true),
            sample(0.3, good_pos, false),
            sample(0.4, bad_pos, false),
            sample(0.5, bad_pos, false),
        ];
        save_session(&paths, &artifact("20250101_120000", samples)).unwrap();

        let (heatmap, summary) = compute_heatmap(&paths, &play_area(), 0.25).unwrap();
        assert_eq!(summary.sessions, 1);
        assert_eq!(summary.points, 6);
        assert_eq!(summary.ok_points, 3);
        assert_eq!(summary.bad_points, 3);

        let cell = |x: f64, y: f64| {
            let xi = ((x - heatmap.origin.x) / heatmap.step_m).floor() as usize;
            let yi = ((y - heatmap.origin.y) / heatmap.step_m).floor() as usize;
            heatmap.score[yi * heatmap.w + xi]
        };
        assert_eq!(cell(0.1, 0.1), 75);
        assert_eq!(cell(-0.6, -0.6), 0);
        // An untouched inside cell defaults to the 50 midpoint.
        assert_eq!(cell(0.6, -0.6), 50);
    }

    #[test]
    fn outside_cells_are_marked_negative() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::at(dir.path());
        paths.ensure_dirs().unwrap();
        // Diamond leaves the bounding-box corners outside.
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
        save_session(
            &paths,
            &artifact("20250101_120000", vec![sample(0.0, Vec3::default(), true)]),
        )
        .unwrap();
        let (heatmap, _) = compute_heatmap(&paths, &diamond, 0.25).unwrap();
        assert_eq!(heatmap.score[0], -1); // bbox corner cell
        assert!(heatmap.score.contains(&-1));
    }

    #[test]
    fn undecodable_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let paths = AppPaths::at(dir.path());
        paths.ensure_dirs().unwrap();
        std::fs::write(paths.sessions_dir.join("20250101_000000.json"), b"{ not json").unwrap();
        save_session(
            &paths,
            &artifact(
                "20250101_120000",
                vec![sample(0.0, Vec3::new(0.1, 0.1, 1.0), true)],
            ),
        )
        .unwrap();
        let (_, summary) = compute_heatmap(&paths, &play_area(), 0.25).unwrap();
        assert_eq!(summary.sessions, 1);
        assert_eq!(summary.points, 1);
    }
}
