//! # recommendations
//!
//! Ranked, actionable coaching output derived from the current geometry,
//! the cached coverage result and the last diagnostic metrics. Output order
//! is stable: Station A entries, then Station B, then General, each sorted
//! by text.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use vr_types::geometry::angle_diff_deg;
use vr_types::{PlayArea, StationPose};

use crate::coverage::{station_yaw_pitch_deg, CoverageResult};
use crate::metrics::SessionMetrics;

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Confidence {
    Low,
    Med,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Confidence::Low => "Low",
            Confidence::Med => "Med",
            Confidence::High => "High",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// "Station A" | "Station B" | "General"
    pub target: String,
    pub text: String,
    pub confidence: Confidence,
}

impl Recommendation {
    /// Single-line rendering used by the snapshot.
    pub fn render(&self) -> String {
        format!("{} [{}]: {}", self.target, self.confidence, self.text)
    }
}

// ── Rule evaluation ───────────────────────────────────────────────────────────

/// Yaw/pitch error below this is considered aligned.
const AIM_TOLERANCE_DEG: f64 = 6.0;

fn desired_yaw_deg(from: (f64, f64), to: (f64, f64)) -> f64 {
    (to.1 - from.1).atan2(to.0 - from.0).to_degrees()
}

pub fn generate_recommendations(
    play_area: &PlayArea,
    stations: &[StationPose],
    coverage: Option<&CoverageResult>,
    metrics: Option<&SessionMetrics>,
    station_labels_by_serial: &BTreeMap<String, String>,
) -> Vec<Recommendation> {
    let mut recs: Vec<Recommendation> = Vec::new();
    let centroid = play_area.centroid();

    // Coverage-driven global hints
    if let Some(cov) = coverage {
        if cov.overlap_pct_foot < 55.0 {
            recs.push(Recommendation {
                target: "General".into(),
                text: format!(
                    "Foot-height 2-station overlap is low ({:.1}%). Favor higher mounts and \
                     slightly more downward tilt to improve tracker visibility near the floor.",
                    cov.overlap_pct_foot
                ),
                confidence: if cov.overlap_pct_foot > 35.0 {
                    Confidence::Med
                } else {
                    Confidence::High
                },
            });
        }
        if let Some(warning) = &cov.sync_warning {
            recs.push(Recommendation {
                target: "General".into(),
                text: warning.clone(),
                confidence: Confidence::Med,
            });
        }
    }

    // Diagnostic-derived hints
    let mut likely_station_counts: BTreeMap<String, u32> = BTreeMap::new();
    let mut worst_yaw_bin: Option<String> = None;
    let mut worst_yaw_bin_count = 0u32;
    if let Some(metrics) = metrics {
        for tm in &metrics.per_tracker {
            for d in &tm.dropouts {
                if let Some(serial) = &d.likely_station_serial {
                    *likely_station_counts.entry(serial.clone()).or_insert(0) += 1;
                }
            }
            for (label, &count) in &tm.dropout_yaw_bins {
                if count > worst_yaw_bin_count {
                    worst_yaw_bin = Some(label.clone());
                    worst_yaw_bin_count = count;
                }
            }
        }
        if let Some(bin) = worst_yaw_bin {
            if worst_yaw_bin_count >= 3 {
                recs.push(Recommendation {
                    target: "General".into(),
                    text: format!(
                        "Dropouts cluster at HMD yaw bin {bin}°. Check for body/self-occlusion \
                         or reflective surfaces in that direction (mirrors/TV/windows)."
                    ),
                    confidence: Confidence::Med,
                });
            }
        }
    }

    // Station-specific geometry hints (height/yaw/tilt)
    for (idx, s) in stations.iter().take(2).enumerate() {
        let fallback = if idx == 0 { "Station A" } else { "Station B" };
        let label = station_labels_by_serial
            .get(&s.serial)
            .cloned()
            .unwrap_or_else(|| fallback.to_string());
        let (yaw, pitch) = station_yaw_pitch_deg(s);
        let desired_yaw = desired_yaw_deg((s.position.x, s.position.y), (centroid.x, centroid.y));
        let yaw_err = angle_diff_deg(desired_yaw, yaw);

        if yaw_err.abs() >= AIM_TOLERANCE_DEG {
            recs.push(Recommendation {
                target: label.clone(),
                text: format!(
                    "Yaw {yaw_err:+.0}° toward play area center (current yaw {yaw:.0}°, \
                     target {desired_yaw:.0}°)."
                ),
                confidence: Confidence::Med,
            });
        }

        let z = s.position.z;
        if z < 2.0 {
            recs.push(Recommendation {
                target: label.clone(),
                text: format!(
                    "Raise mount +{:.1}m (current {z:.1}m; target ~2.1–2.4m) to reduce body \
                     occlusion.",
                    2.2 - z
                ),
                confidence: if z < 1.7 { Confidence::High } else { Confidence::Med },
            });
        }

        // Desired tilt: aim slightly downward toward a point near the center
        // at waist height.
        let dx = centroid.x - s.position.x;
        let dy = centroid.y - s.position.y;
        let horiz = (dx * dx + dy * dy).sqrt();
        let target_pitch = (1.0 - z).atan2(horiz.max(1e-6)).to_degrees();
        let pitch_err = angle_diff_deg(target_pitch, pitch);
        if pitch_err.abs() >= AIM_TOLERANCE_DEG {
            let direction = if pitch_err < 0.0 { "down" } else { "up" };
            recs.push(Recommendation {
                target: label.clone(),
                text: format!(
                    "Tilt {direction} ~{:.0}° toward center (current pitch {pitch:.0}°, \
                     target {target_pitch:.0}°).",
                    pitch_err.abs()
                ),
                confidence: if horiz < 1.0 { Confidence::Low } else { Confidence::Med },
            });
        }

        // If diagnostics point to a station as likely culprit, surface it.
        let count = likely_station_counts.get(&s.serial).copied().unwrap_or(0);
        if count >= 3 {
            recs.push(Recommendation {
                target: label,
                text: format!(
                    "Diagnostics: {count} dropouts were geometrically more consistent with \
                     occlusion from this station; consider re-aiming and clearing line-of-sight."
                ),
                confidence: if count >= 6 { Confidence::High } else { Confidence::Med },
            });
        }
    }

    if recs.is_empty() {
        recs.push(Recommendation {
            target: "General".into(),
            text: "No strong issues detected from current geometric estimate; run a 60s \
                   diagnostic test to generate evidence-based recommendations."
                .into(),
            confidence: Confidence::Low,
        });
    }

    // Stable output: Station A, then Station B, then General, then by text.
    recs.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    recs
}

fn sort_key(r: &Recommendation) -> (u8, String) {
    let rank = if r.target.starts_with("Station A") {
        0
    } else if r.target.starts_with("Station B") {
        1
    } else {
        2
    };
    (rank, r.text.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{compute_coverage, CoverageParams};
    use vr_types::geometry::{Mat3, Vec2, Vec3};
    use vr_types::PlayAreaSource;

    fn room() -> PlayArea {
        PlayArea {
            corners: vec![
                Vec2::new(-1.5, -1.5),
                Vec2::new(1.5, -1.5),
                Vec2::new(1.5, 1.5),
                Vec2::new(-1.5, 1.5),
            ],
            source: PlayAreaSource::Chaperone,
            warning: None,
        }
    }

    fn aimed_station(serial: &str, pos: Vec3, pitch_deg: f64) -> StationPose {
        let yaw = (-pos.y).atan2(-pos.x).to_degrees();
        StationPose {
            serial: serial.into(),
            position: pos,
            rotation: Mat3::aimed(yaw, pitch_deg),
        }
    }

    #[test]
    fn low_station_gets_high_confidence_raise() {
        let station = aimed_station("LHB-A", Vec3::new(-2.0, -2.0, 1.5), -10.0);
        let recs = generate_recommendations(&room(), &[station], None, None, &BTreeMap::new());
        let raise = recs
            .iter()
            .find(|r| r.target == "Station A" && r.text.contains("2.1–2.4m"))
            .expect("raise recommendation");
        assert_eq!(raise.confidence, Confidence::High);
    }

    #[test]
    fn medium_height_station_gets_medium_confidence_raise() {
        let station = aimed_station("LHB-A", Vec3::new(-2.0, -2.0, 1.85), -10.0);
        let recs = generate_recommendations(&room(), &[station], None, None, &BTreeMap::new());
        let raise = recs
            .iter()
            .find(|r| r.text.contains("Raise mount"))
            .expect("raise recommendation");
        assert_eq!(raise.confidence, Confidence::Med);
    }

    #[test]
    fn misaimed_station_gets_yaw_hint() {
        let station = StationPose {
            serial: "LHB-A".into(),
            position: Vec3::new(-2.0, -2.0, 2.2),
            rotation: Mat3::aimed(45.0 + 30.0, -20.0), // 30° off the centroid aim
        };
        let recs = generate_recommendations(&room(), &[station], None, None, &BTreeMap::new());
        assert!(recs.iter().any(|r| r.text.contains("toward play area center")));
    }

    #[test]
    fn sync_warning_is_surfaced_verbatim() {
        let stations = vec![
            aimed_station("LHB-A", Vec3::new(-2.0, -2.0, 2.2), -20.0),
            StationPose {
                serial: "LHB-B".into(),
                position: Vec3::new(2.0, 2.0, 2.2),
                rotation: Mat3::aimed(45.0, -20.0), // faces away from A
            },
        ];
        let cov = compute_coverage(&room(), &stations, &CoverageParams::default());
        let warning = cov.sync_warning.clone().expect("sync warning");
        let recs =
            generate_recommendations(&room(), &stations, Some(&cov), None, &BTreeMap::new());
        assert!(recs.iter().any(|r| r.target == "General" && r.text == warning));
    }

    #[test]
    fn well_placed_pair_yields_only_the_fallback() {
        let stations = vec![
            aimed_station("LHB-A", Vec3::new(-2.0, -2.0, 2.2), -23.0),
            aimed_station("LHB-B", Vec3::new(2.0, 2.0, 2.2), -23.0),
        ];
        let recs = generate_recommendations(&room(), &stations, None, None, &BTreeMap::new());
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].confidence, Confidence::Low);
        assert!(recs[0].text.contains("run a 60s"));
    }

    #[test]
    fn output_is_sorted_station_a_then_b_then_general() {
        let stations = vec![
            aimed_station("LHB-A", Vec3::new(-2.0, -2.0, 1.5), -5.0),
            aimed_station("LHB-B", Vec3::new(2.0, 2.0, 1.5), -5.0),
        ];
        let labels = BTreeMap::from([
            ("LHB-A".to_string(), "Station A".to_string()),
            ("LHB-B".to_string(), "Station B".to_string()),
        ]);
        // Low foot overlap forces a General entry alongside per-station ones.
        let cov = compute_coverage(&room(), &stations[..1], &CoverageParams::default());
        let recs = generate_recommendations(&room(), &stations, Some(&cov), None, &labels);

        let ranks: Vec<u8> = recs.iter().map(|r| sort_key(r).0).collect();
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        assert_eq!(ranks, sorted);
        assert!(ranks.contains(&0) && ranks.contains(&1) && ranks.contains(&2));
    }

    #[test]
    fn repeated_occluder_blame_is_surfaced() {
        use crate::metrics::{DropoutEvent, SessionMetrics, TrackerMetrics};

        let stations = vec![
            aimed_station("LHB-A", Vec3::new(-2.0, -2.0, 2.2), -23.0),
            aimed_station("LHB-B", Vec3::new(2.0, 2.0, 2.2), -23.0),
        ];
        let dropout = |serial: &str| DropoutEvent {
            start_s: 1.0,
            end_s: 2.0,
            duration_s: 1.0,
            hmd_yaw_deg: None,
            likely_station_serial: Some(serial.to_string()),
            station_margins_deg: BTreeMap::new(),
        };
        let metrics = SessionMetrics {
            per_tracker: vec![TrackerMetrics {
                serial: "LHR-TRACK001".into(),
                role: "Waist".into(),
                dropout_count: 6,
                dropout_duration_s: 6.0,
                jitter_pos_rms_m_p50: 0.0,
                jitter_pos_rms_m_p95: 0.0,
                jitter_yaw_deg_p50: 0.0,
                jitter_yaw_deg_p95: 0.0,
                dropout_yaw_bins: BTreeMap::new(),
                dropouts: (0..6).map(|_| dropout("LHB-B")).collect(),
            }],
        };
        let recs =
            generate_recommendations(&room(), &stations, None, Some(&metrics), &BTreeMap::new());
        let blame = recs
            .iter()
            .find(|r| r.target == "Station B" && r.text.contains("occlusion from this station"))
            .expect("occluder recommendation");
        assert_eq!(blame.confidence, Confidence::High);
    }
}
