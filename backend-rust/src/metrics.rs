//! # metrics
//!
//! Per-tracker statistics over a captured diagnostic session: edge-triggered
//! dropout events, streaming jitter (positional RMS + circular yaw stddev
//! over a rolling 1 s window), yaw-bin dropout histograms and a heuristic
//! guess at which station was occluded when a dropout started.
//!
//! [`JitterWindow`] is also fed live by the state-engine poller, so the
//! numbers shown in the snapshot and the numbers in a session report come
//! from the same computation.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use vr_types::geometry::{wrap_deg, Vec3};
use vr_types::StationPose;

use crate::coverage::{station_sees_point, CoverageParams};
use crate::session::SessionSample;

// ── Window length gate ────────────────────────────────────────────────────────

/// Minimum samples in the rolling window before jitter is reported.
const MIN_WINDOW_LEN: usize = 5;
/// Window horizon in seconds.
const WINDOW_S: f64 = 1.0;

// ── Result types ──────────────────────────────────────────────────────────────

/// One contiguous interval where a tracker was not OK.
/// Invariants: `end_s >= start_s`, `duration_s == end_s - start_s`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropoutEvent {
    pub start_s: f64,
    pub end_s: f64,
    pub duration_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hmd_yaw_deg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likely_station_serial: Option<String>,
    pub station_margins_deg: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerMetrics {
    pub serial: String,
    pub role: String,
    pub dropout_count: usize,
    pub dropout_duration_s: f64,
    pub jitter_pos_rms_m_p50: f64,
    pub jitter_pos_rms_m_p95: f64,
    pub jitter_yaw_deg_p50: f64,
    pub jitter_yaw_deg_p95: f64,
    /// Histogram of HMD yaw at dropout start, 10°-wide bins ("0-10" ...).
    pub dropout_yaw_bins: BTreeMap<String, u32>,
    pub dropouts: Vec<DropoutEvent>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub per_tracker: Vec<TrackerMetrics>,
}

// ── Percentiles & bins ────────────────────────────────────────────────────────

/// Nearest-rank percentile on a copy of the series; 0.0 for an empty series.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut xs = values.to_vec();
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let k = ((pct / 100.0) * (xs.len() - 1) as f64).round() as usize;
    xs[k.min(xs.len() - 1)]
}

/// 10°-wide bin label for a yaw angle, normalized to [0, 360).
pub fn yaw_bin_label(yaw_deg: f64) -> String {
    let y = yaw_deg.rem_euclid(360.0);
    let start = (y / 10.0).floor() as i32 * 10;
    format!("{}-{}", start, start + 10)
}

// ── Rolling jitter window ─────────────────────────────────────────────────────

/// Bounded deque of `(t, pos, yaw)` entries covering the trailing second of
/// OK samples. Entries are pushed in monotone time order.
#[derive(Debug, Clone, Default)]
pub struct JitterWindow {
    entries: VecDeque<(f64, Vec3, f64)>,
}

impl JitterWindow {
    /// Append an OK sample and drop entries older than `t - 1.0`.
    pub fn push(&mut self, t: f64, pos: Vec3, yaw_deg: f64) {
        self.entries.push_back((t, pos, yaw_deg));
        let t_min = t - WINDOW_S;
        while matches!(self.entries.front(), Some(&(t0, _, _)) if t0 < t_min) {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(pos_rms_m, yaw_circular_std_deg)`, or `None` while the window holds
    /// fewer than five entries.
    pub fn compute(&self) -> Option<(f64, f64)> {
        let n = self.entries.len();
        if n < MIN_WINDOW_LEN {
            return None;
        }
        let nf = n as f64;
        let (mut mx, mut my, mut mz) = (0.0, 0.0, 0.0);
        for (_, p, _) in &self.entries {
            mx += p.x;
            my += p.y;
            mz += p.z;
        }
        mx /= nf;
        my /= nf;
        mz /= nf;
        let (mut vx, mut vy, mut vz) = (0.0, 0.0, 0.0);
        for (_, p, _) in &self.entries {
            vx += (p.x - mx).powi(2);
            vy += (p.y - my).powi(2);
            vz += (p.z - mz).powi(2);
        }
        let pos_rms = ((vx + vy + vz) / nf).sqrt();

        // Circular stddev: wrapped diffs against the circular mean yaw.
        let ssum: f64 = self.entries.iter().map(|(_, _, y)| y.to_radians().sin()).sum();
        let csum: f64 = self.entries.iter().map(|(_, _, y)| y.to_radians().cos()).sum();
        let mean = if ssum == 0.0 && csum == 0.0 {
            self.entries[0].2
        } else {
            ssum.atan2(csum).to_degrees()
        };
        let sq_sum: f64 = self
            .entries
            .iter()
            .map(|(_, _, y)| wrap_deg(y - mean).powi(2))
            .sum();
        let yaw_std = (sq_sum / nf).sqrt();
        Some((pos_rms, yaw_std))
    }
}

// ── Likely-occluder inference ─────────────────────────────────────────────────

/// FOV margins from every station to the tracker's last known position.
///
/// With exactly two stations, when exactly one of them fails the FOV check
/// the *failing* station's serial is returned (the seeing station acts as
/// the witness; the other is the one recommended for action). This mirrors
/// the shipped behavior even though the naming reads inverted.
pub fn infer_likely_station(
    stations: &[StationPose],
    tracker_pos: Vec3,
    params: &CoverageParams,
) -> (Option<String>, BTreeMap<String, f64>) {
    let mut margins = BTreeMap::new();
    let mut visible = BTreeMap::new();
    for s in stations {
        let (ok, margin) = station_sees_point(s, tracker_pos, params);
        margins.insert(s.serial.clone(), margin);
        visible.insert(s.serial.clone(), ok);
    }
    if stations.len() == 2 {
        let (s0, s1) = (&stations[0].serial, &stations[1].serial);
        if visible[s0] && !visible[s1] {
            return (Some(s1.clone()), margins);
        }
        if visible[s1] && !visible[s0] {
            return (Some(s0.clone()), margins);
        }
    }
    (None, margins)
}

// ── Session analysis ──────────────────────────────────────────────────────────

/// Analyze a captured diagnostic session, one tracker at a time in serial
/// order. Dropouts are reported in the order they close; one left open at
/// end-of-stream is closed at the last sample's timestamp.
pub fn analyze_session(
    samples: &[SessionSample],
    tracker_roles_by_serial: &BTreeMap<String, String>,
    stations: &[StationPose],
    params: &CoverageParams,
) -> SessionMetrics {
    let mut per_tracker = Vec::with_capacity(tracker_roles_by_serial.len());

    for (serial, role) in tracker_roles_by_serial {
        let mut ok_prev = false;
        let mut dropout_start: Option<f64> = None;
        let mut dropout_yaw: Option<f64> = None;
        let mut dropout_pos: Option<Vec3> = None;
        let mut dropouts: Vec<DropoutEvent> = Vec::new();
        let mut yaw_bins: BTreeMap<String, u32> = BTreeMap::new();

        let mut pos_jitter: Vec<f64> = Vec::new();
        let mut yaw_jitter: Vec<f64> = Vec::new();
        let mut window = JitterWindow::default();

        for sample in samples {
            let t = sample.t_s;
            let tracker = sample.trackers.get(serial);
            let ok = tracker.map(|tr| tr.ok).unwrap_or(false);
            let pos = tracker.and_then(|tr| tr.pos);

            if ok {
                if let Some(tr) = tracker {
                    window.push(
                        t,
                        tr.pos.unwrap_or_default(),
                        tr.yaw_deg.unwrap_or_default(),
                    );
                    if let Some((pos_rms, yaw_std)) = window.compute() {
                        pos_jitter.push(pos_rms);
                        yaw_jitter.push(yaw_std);
                    }
                }
            }

            if ok_prev && !ok {
                dropout_start = Some(t);
                dropout_yaw = sample.hmd_yaw_deg;
                if let Some(yaw) = dropout_yaw {
                    *yaw_bins.entry(yaw_bin_label(yaw)).or_insert(0) += 1;
                }
                dropout_pos = pos;
            } else if !ok_prev && ok {
                if let Some(start) = dropout_start.take() {
                    dropouts.push(close_dropout(
                        start,
                        t,
                        dropout_yaw.take(),
                        dropout_pos.take(),
                        stations,
                        params,
                    ));
                }
            }

            ok_prev = ok;
        }

        // Session ended inside a dropout: close at the last timestamp.
        if let (Some(start), Some(last)) = (dropout_start, samples.last()) {
            dropouts.push(close_dropout(
                start,
                last.t_s,
                dropout_yaw,
                dropout_pos,
                stations,
                params,
            ));
        }

        per_tracker.push(TrackerMetrics {
            serial: serial.clone(),
            role: role.clone(),
            dropout_count: dropouts.len(),
            dropout_duration_s: dropouts.iter().map(|d| d.duration_s).sum(),
            jitter_pos_rms_m_p50: percentile(&pos_jitter, 50.0),
            jitter_pos_rms_m_p95: percentile(&pos_jitter, 95.0),
            jitter_yaw_deg_p50: percentile(&yaw_jitter, 50.0),
            jitter_yaw_deg_p95: percentile(&yaw_jitter, 95.0),
            dropout_yaw_bins: yaw_bins,
            dropouts,
        });
    }

    SessionMetrics { per_tracker }
}

fn close_dropout(
    start_s: f64,
    end_s: f64,
    hmd_yaw_deg: Option<f64>,
    last_pos: Option<Vec3>,
    stations: &[StationPose],
    params: &CoverageParams,
) -> DropoutEvent {
    let (likely, margins) = match last_pos {
        Some(pos) if !stations.is_empty() => infer_likely_station(stations, pos, params),
        _ => (None, BTreeMap::new()),
    };
    DropoutEvent {
        start_s,
        end_s,
        duration_s: (end_s - start_s).max(0.0),
        hmd_yaw_deg,
        likely_station_serial: likely,
        station_margins_deg: margins,
    }
}
