//! # state_engine
//!
//! The long-running supervisor at the heart of the coach.
//!
//! ## Architecture
//! Two OS threads share one state block behind a `RwLock`:
//!   1. Poller thread (30 Hz): keeps the pose-source connection alive with a
//!      1 s reconnect cooldown, enumerates devices, refreshes the play area,
//!      maintains per-tracker live stats and the cached coverage result.
//!   2. Diagnostic thread (90 Hz, on demand): runs the scripted 60 s capture,
//!      then analyzes, persists and publishes the session. At most one at a
//!      time, guarded by a dedicated mutex so the 60 s capture never holds
//!      the state lock.
//!
//! HTTP handlers only ever call [`StateEngine::snapshot`] and the command
//! methods; they never touch the pose source. Snapshots are deep copies, so
//! readers hold no references into engine state.
//!
//! Pose-source calls are made with no lock held; a failing call drops the
//! engine to disconnected, records `last_error` and tears the source down
//! for re-init. Errors never escape the threads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use thiserror::Error;
use vr_types::geometry::{angle_diff_deg, Vec3};
use vr_types::{DeviceClass, DeviceInfo, PlayArea, PoseSource, StationPose};

use crate::coverage::{compute_coverage, station_yaw_pitch_deg, CoverageParams, CoverageResult};
use crate::history::{compute_heatmap, Heatmap, HistorySummary};
use crate::metrics::{analyze_session, JitterWindow, SessionMetrics};
use crate::recommendations::generate_recommendations;
use crate::session::{SessionArtifact, SessionSample, StationRecord, TrackerSample};
use crate::storage::{
    export_report, list_sessions, load_config, render_summary, save_config, save_session,
    AppPaths, Config,
};

// ── Engine configuration ──────────────────────────────────────────────────────

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// Runtime tunables, resolved once at startup. Every knob has a `COACH_*`
/// environment override.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub poll_rate_hz: f64,
    pub diagnostic_rate_hz: f64,
    pub diagnostic_duration_s: f64,
    pub coverage: CoverageParams,
    pub http_bind_host: String,
    pub http_bind_port: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_rate_hz: env_f64("COACH_POLL_RATE_HZ", 30.0),
            diagnostic_rate_hz: env_f64("COACH_DIAGNOSTIC_RATE_HZ", 90.0),
            diagnostic_duration_s: env_f64("COACH_DIAGNOSTIC_DURATION_S", 60.0),
            coverage: CoverageParams {
                grid_step_m: env_f64("COACH_COVERAGE_GRID_STEP_M", 0.10),
                foot_z_m: env_f64("COACH_FOOT_Z_M", 0.15),
                waist_z_m: env_f64("COACH_WAIST_Z_M", 1.00),
                fov_yaw_deg: env_f64("COACH_FOV_YAW_DEG", 60.0),
                fov_pitch_deg: env_f64("COACH_FOV_PITCH_DEG", 45.0),
            },
            http_bind_host: std::env::var("COACH_HTTP_HOST")
                .unwrap_or_else(|_| "127.0.0.1".to_string()),
            http_bind_port: env_u16("COACH_HTTP_PORT", 17835),
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiagnosticError {
    #[error("Diagnostic already running")]
    AlreadyRunning,
    #[error("Trackers not selected.")]
    TrackersNotSelected,
    #[error("Stations/play area not ready.")]
    NotReady,
}

// ── Live tracker stats ────────────────────────────────────────────────────────

/// Owned exclusively by the poller; snapshots copy the plain fields out.
#[derive(Debug, Default)]
struct TrackerLiveStats {
    prev_ok: bool,
    dropouts: u32,
    window: JitterWindow,
    connected: bool,
    tracking_ok: bool,
    jitter_pos_mm: f64,
    jitter_yaw_deg: f64,
    last_pos: Option<Vec3>,
    last_yaw_deg: f64,
}

// ── Snapshot (publication contract) ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSnapshot {
    pub label: String,
    pub serial: String,
    pub pos: Vec3,
    pub height_m: f64,
    pub yaw_deg: f64,
    pub pitch_deg: f64,
    pub aim_yaw_deg: f64,
    pub aim_error_deg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerSnapshot {
    pub role: String,
    pub serial: String,
    pub connected: bool,
    pub tracking_ok: bool,
    pub dropouts: u32,
    pub jitter_pos_mm: f64,
    pub jitter_yaw_deg: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos: Option<Vec3>,
    pub yaw_deg: f64,
}

/// Compact coverage grids for the renderer; −1 marks cells outside the play
/// area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageHeatmap {
    pub origin: vr_types::geometry::Vec2,
    pub step_m: f64,
    pub w: usize,
    pub h: usize,
    pub foot: Vec<i8>,
    pub waist: Vec<i8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSnapshot {
    pub overlap_pct_foot: f64,
    pub overlap_pct_waist: f64,
    pub overall_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSnapshot {
    pub running: bool,
    pub stage: String,
    pub t_s: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_session_timestamp: Option<String>,
}

/// Immutable, consistent view handed to HTTP consumers. No field aliases
/// engine internals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub play_area: Option<PlayArea>,
    pub stations: Vec<StationSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coverage: Option<CoverageSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heatmap: Option<CoverageHeatmap>,
    pub trackers: Vec<TrackerSnapshot>,
    pub recommendations: Vec<String>,
    pub diagnostic: DiagnosticSnapshot,
}

/// Historical-ingest payload for `GET /history`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryReport {
    pub heatmap: Heatmap,
    pub summary: HistorySummary,
}

// ── Engine state ──────────────────────────────────────────────────────────────

struct EngineState {
    cfg: Config,
    connected: bool,
    last_error: Option<String>,
    play_area: Option<PlayArea>,
    stations: Vec<StationPose>,
    coverage: Option<CoverageResult>,
    coverage_key: Option<String>,
    tracker_stats: HashMap<String, TrackerLiveStats>,
    diag_stage: String,
    diag_t_s: f64,
    last_metrics: Option<SessionMetrics>,
    last_session: Option<SessionArtifact>,
}

struct EngineShared {
    state: RwLock<EngineState>,
    /// Guards only the "a diagnostic is running" flag, so trigger checks
    /// never contend with the 60 s capture.
    diag_running: Mutex<bool>,
    diag_handle: Mutex<Option<thread::JoinHandle<()>>>,
    poller_handle: Mutex<Option<thread::JoinHandle<()>>>,
    stop: AtomicBool,
    source: Arc<dyn PoseSource>,
    paths: AppPaths,
    engine_cfg: EngineConfig,
    /// Time base for live jitter windows.
    epoch: Instant,
}

/// Supervisor facade. Cheap to clone; all clones share the same engine.
#[derive(Clone)]
pub struct StateEngine {
    shared: Arc<EngineShared>,
}

impl StateEngine {
    pub fn new(source: Arc<dyn PoseSource>, paths: AppPaths, engine_cfg: EngineConfig) -> Self {
        let cfg = load_config(&paths);
        Self {
            shared: Arc::new(EngineShared {
                state: RwLock::new(EngineState {
                    cfg,
                    connected: false,
                    last_error: None,
                    play_area: None,
                    stations: Vec::new(),
                    coverage: None,
                    coverage_key: None,
                    tracker_stats: HashMap::new(),
                    diag_stage: "Idle".to_string(),
                    diag_t_s: 0.0,
                    last_metrics: None,
                    last_session: None,
                }),
                diag_running: Mutex::new(false),
                diag_handle: Mutex::new(None),
                poller_handle: Mutex::new(None),
                stop: AtomicBool::new(false),
                source,
                paths,
                engine_cfg,
                epoch: Instant::now(),
            }),
        }
    }

    /// Spawn the poller thread. Idempotent; a second call is a no-op.
    pub fn start(&self) {
        let mut handle = self.shared.poller_handle.lock().expect("poller handle lock");
        if handle.is_some() {
            return;
        }
        let shared = self.shared.clone();
        *handle = Some(
            thread::Builder::new()
                .name("coach-poller".to_string())
                .spawn(move || poller_loop(&shared))
                .expect("spawn poller thread"),
        );
    }

    /// Signal both threads to stop, join them with a bounded wait, then shut
    /// the pose source down.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
        let deadline = Duration::from_secs(2);
        if let Some(handle) = self.shared.poller_handle.lock().expect("poller handle lock").take()
        {
            join_with_timeout(handle, deadline, "poller");
        }
        if let Some(handle) = self.shared.diag_handle.lock().expect("diag handle lock").take() {
            join_with_timeout(handle, deadline, "diagnostic");
        }
        self.shared.source.shutdown();
        info!("state engine stopped");
    }

    /// Drop the coverage cache; the next poll recomputes from scratch.
    pub fn force_recompute(&self) {
        let mut state = self.shared.state.write().expect("state lock");
        state.coverage_key = None;
        state.coverage = None;
    }

    /// Start the scripted diagnostic on its own thread. Rejected while one
    /// is already running or while stations/trackers/play area are not
    /// ready.
    pub fn trigger_diagnostic(&self) -> Result<(), DiagnosticError> {
        let mut running = self.shared.diag_running.lock().expect("diag flag lock");
        if *running {
            return Err(DiagnosticError::AlreadyRunning);
        }
        {
            let state = self.shared.state.read().expect("state lock");
            if state.cfg.tracker_roles_by_serial().len() != 3 {
                return Err(DiagnosticError::TrackersNotSelected);
            }
            if state.play_area.is_none() || state.stations.len() != 2 {
                return Err(DiagnosticError::NotReady);
            }
        }
        *running = true;
        {
            let mut state = self.shared.state.write().expect("state lock");
            state.diag_stage = "Starting".to_string();
            state.diag_t_s = 0.0;
        }
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("coach-diagnostic".to_string())
            .spawn(move || run_diagnostic(&shared))
            .expect("spawn diagnostic thread");
        *self.shared.diag_handle.lock().expect("diag handle lock") = Some(handle);
        Ok(())
    }

    /// Deep-copied, internally consistent view of the engine.
    /// Recommendations are recomputed on every call; they are cheap and
    /// depend on ephemeral fields.
    pub fn snapshot(&self) -> Snapshot {
        // Lock order matches trigger_diagnostic: diag flag first, then state.
        let diag_running = *self.shared.diag_running.lock().expect("diag flag lock");
        let state = self.shared.state.read().expect("state lock");

        let centroid = state
            .play_area
            .as_ref()
            .map(|pa| pa.centroid())
            .unwrap_or_default();

        let stations: Vec<StationSnapshot> = state
            .stations
            .iter()
            .take(2)
            .enumerate()
            .map(|(i, s)| {
                let label = if i == 0 { "Station A" } else { "Station B" };
                let (yaw, pitch) = station_yaw_pitch_deg(s);
                let aim = (centroid.y - s.position.y)
                    .atan2(centroid.x - s.position.x)
                    .to_degrees();
                StationSnapshot {
                    label: label.to_string(),
                    serial: s.serial.clone(),
                    pos: s.position,
                    height_m: s.position.z,
                    yaw_deg: yaw,
                    pitch_deg: pitch,
                    aim_yaw_deg: aim,
                    aim_error_deg: angle_diff_deg(aim, yaw),
                }
            })
            .collect();

        let coverage = state.coverage.as_ref().map(|cov| CoverageSnapshot {
            overlap_pct_foot: cov.overlap_pct_foot,
            overlap_pct_waist: cov.overlap_pct_waist,
            overall_score: cov.overall_score,
            sync_warning: cov.sync_warning.clone(),
        });
        let heatmap = state.coverage.as_ref().map(|cov| CoverageHeatmap {
            origin: cov.grid_origin,
            step_m: cov.grid_step,
            w: cov.w,
            h: cov.h,
            foot: mask_scores(&cov.inside_mask, &cov.score_foot),
            waist: mask_scores(&cov.inside_mask, &cov.score_waist),
        });

        let trackers: Vec<TrackerSnapshot> = state
            .cfg
            .tracker_roles_by_serial()
            .into_iter()
            .map(|(serial, role)| {
                let default = TrackerLiveStats::default();
                let st = state.tracker_stats.get(&serial).unwrap_or(&default);
                TrackerSnapshot {
                    role,
                    serial: serial.clone(),
                    connected: st.connected,
                    tracking_ok: st.tracking_ok,
                    dropouts: st.dropouts,
                    jitter_pos_mm: st.jitter_pos_mm,
                    jitter_yaw_deg: st.jitter_yaw_deg,
                    pos: if st.connected { st.last_pos } else { None },
                    yaw_deg: st.last_yaw_deg,
                }
            })
            .collect();

        let rec_play_area = state
            .play_area
            .clone()
            .unwrap_or_else(PlayArea::default_square);
        let recommendations = generate_recommendations(
            &rec_play_area,
            &state.stations,
            state.coverage.as_ref(),
            state.last_metrics.as_ref(),
            &state.cfg.station_labels_by_serial(),
        )
        .iter()
        .map(|r| r.render())
        .collect();

        Snapshot {
            connected: state.connected,
            last_error: state.last_error.clone(),
            play_area: state.play_area.clone(),
            stations,
            coverage,
            heatmap,
            trackers,
            recommendations,
            diagnostic: DiagnosticSnapshot {
                running: diag_running,
                stage: state.diag_stage.clone(),
                t_s: state.diag_t_s,
                last_session_timestamp: state
                    .last_session
                    .as_ref()
                    .map(|s| s.timestamp.clone()),
            },
        }
    }

    /// Historical heatmap over all saved sessions, rasterized against the
    /// current play area (or the default square before first connect).
    pub fn history(&self, step_m: f64) -> Option<HistoryReport> {
        let play_area = {
            let state = self.shared.state.read().expect("state lock");
            state
                .play_area
                .clone()
                .unwrap_or_else(PlayArea::default_square)
        };
        compute_heatmap(&self.shared.paths, &play_area, step_m)
            .map(|(heatmap, summary)| HistoryReport { heatmap, summary })
    }

    /// Write the last finished session's report files. `None` when no
    /// diagnostic has completed yet.
    pub fn export_last_session(
        &self,
    ) -> Option<Result<(std::path::PathBuf, std::path::PathBuf), crate::storage::StorageError>>
    {
        let (artifact, metrics) = {
            let state = self.shared.state.read().expect("state lock");
            (state.last_session.clone()?, state.last_metrics.clone()?)
        };
        let summary = render_summary(&artifact, &metrics);
        Some(export_report(&self.shared.paths, &summary, &artifact))
    }

    /// Number of saved session files (for the health endpoint).
    pub fn session_count(&self) -> usize {
        list_sessions(&self.shared.paths).len()
    }

    pub fn http_bind(&self) -> (String, u16) {
        (
            self.shared.engine_cfg.http_bind_host.clone(),
            self.shared.engine_cfg.http_bind_port,
        )
    }
}

fn mask_scores(inside: &[bool], scores: &[u8]) -> Vec<i8> {
    inside
        .iter()
        .zip(scores)
        .map(|(&m, &s)| if m { s as i8 } else { -1 })
        .collect()
}

fn join_with_timeout(handle: thread::JoinHandle<()>, timeout: Duration, name: &str) {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!("{name} thread did not stop within {timeout:?}; detaching");
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
    let _ = handle.join();
}

// ── Poller thread ─────────────────────────────────────────────────────────────

fn poller_loop(shared: &Arc<EngineShared>) {
    let target_dt = Duration::from_secs_f64(1.0 / shared.engine_cfg.poll_rate_hz.max(1.0));
    let mut next_retry = Instant::now();

    while !shared.stop.load(Ordering::Acquire) {
        let tick_start = Instant::now();

        let connected = shared.state.read().expect("state lock").connected;
        if !connected {
            if Instant::now() >= next_retry && !try_init(shared) {
                next_retry = Instant::now() + Duration::from_secs(1);
            }
            thread::sleep(Duration::from_millis(100));
            continue;
        }

        if let Err(e) = poll_once(shared) {
            warn!("poll failed, dropping connection: {e}");
            {
                let mut state = shared.state.write().expect("state lock");
                state.connected = false;
                state.last_error = Some(e.to_string());
            }
            shared.source.shutdown();
            next_retry = Instant::now() + Duration::from_secs(1);
            continue;
        }

        let elapsed = tick_start.elapsed();
        if elapsed < target_dt {
            thread::sleep(target_dt - elapsed);
        }
    }
}

fn try_init(shared: &Arc<EngineShared>) -> bool {
    match shared.source.init() {
        Ok(()) => {
            let mut state = shared.state.write().expect("state lock");
            state.connected = true;
            state.last_error = None;
            info!("pose source connected");
            true
        }
        Err(e) => {
            let mut state = shared.state.write().expect("state lock");
            state.connected = false;
            state.last_error = Some(e.to_string());
            false
        }
    }
}

fn poll_once(shared: &Arc<EngineShared>) -> Result<(), vr_types::AdapterError> {
    // Pose-source calls happen before the lock is taken.
    let devices = shared.source.enumerate()?;
    let play_area = shared.source.play_area();
    let now_s = shared.epoch.elapsed().as_secs_f64();

    let mut state = shared.state.write().expect("state lock");
    // Reload so external edits (setup wizard, manual fixes) apply without a
    // restart.
    state.cfg = load_config(&shared.paths);
    state.play_area = Some(play_area);
    select_station_poses(shared, &mut state, &devices);
    update_tracker_stats(shared, &mut state, &devices, now_s);
    maybe_recompute_coverage(shared, &mut state);
    Ok(())
}

/// Prefer the configured station serials; otherwise adopt the first two
/// tracking references (enumeration order) and persist the choice.
fn select_station_poses(
    shared: &Arc<EngineShared>,
    state: &mut EngineState,
    devices: &[DeviceInfo],
) {
    let refs: Vec<(&String, &vr_types::Pose)> = devices
        .iter()
        .filter(|d| d.class == DeviceClass::TrackingReference && !d.serial.is_empty())
        .filter_map(|d| d.pose.as_ref().filter(|p| p.valid).map(|p| (&d.serial, p)))
        .collect();

    let want_a = state.cfg.base_stations.station_a.clone();
    let want_b = state.cfg.base_stations.station_b.clone();

    let mut out: Vec<StationPose> = Vec::new();
    for want in [&want_a, &want_b] {
        if let Some(serial) = want {
            if let Some((_, pose)) = refs.iter().find(|(s, _)| *s == serial) {
                out.push(StationPose {
                    serial: serial.clone(),
                    position: pose.position,
                    rotation: pose.rotation,
                });
            }
        }
    }

    if out.len() < 2 && refs.len() >= 2 {
        let chosen: Vec<String> = refs.iter().take(2).map(|(s, _)| (*s).clone()).collect();
        if want_a.is_none() || want_b.is_none() {
            state.cfg.base_stations.station_a = Some(chosen[0].clone());
            state.cfg.base_stations.station_b = Some(chosen[1].clone());
            if let Err(e) = save_config(&shared.paths, &state.cfg) {
                warn!("failed to persist adopted stations: {e}");
            } else {
                info!("adopted base stations {} / {}", chosen[0], chosen[1]);
            }
        }
        for serial in &chosen {
            if out.iter().any(|s| &s.serial == serial) {
                continue;
            }
            if let Some((_, pose)) = refs.iter().find(|(s, _)| *s == serial) {
                out.push(StationPose {
                    serial: serial.clone(),
                    position: pose.position,
                    rotation: pose.rotation,
                });
            }
        }
    }

    out.truncate(2);
    state.stations = out;
}

/// Live stats update; also auto-adopts three generic trackers into the
/// configured roles the first time a full set shows up.
fn update_tracker_stats(
    shared: &Arc<EngineShared>,
    state: &mut EngineState,
    devices: &[DeviceInfo],
    now_s: f64,
) {
    let mut roles = state.cfg.tracker_roles_by_serial();
    if roles.len() != 3 {
        let generic: Vec<&String> = devices
            .iter()
            .filter(|d| d.class == DeviceClass::GenericTracker && !d.serial.is_empty())
            .map(|d| &d.serial)
            .collect();
        if generic.len() >= 3 {
            state.cfg.trackers.left_foot = Some(generic[0].clone());
            state.cfg.trackers.right_foot = Some(generic[1].clone());
            state.cfg.trackers.waist = Some(generic[2].clone());
            if let Err(e) = save_config(&shared.paths, &state.cfg) {
                warn!("failed to persist adopted trackers: {e}");
            } else {
                info!(
                    "adopted trackers {} / {} / {}",
                    generic[0], generic[1], generic[2]
                );
            }
            roles = state.cfg.tracker_roles_by_serial();
        }
    }

    let by_serial: HashMap<&str, &vr_types::Pose> = devices
        .iter()
        .filter_map(|d| d.pose.as_ref().map(|p| (d.serial.as_str(), p)))
        .collect();

    for serial in roles.keys() {
        let pose = by_serial.get(serial.as_str()).copied();
        let ok = pose.is_some_and(|p| p.is_ok());
        let st = state.tracker_stats.entry(serial.clone()).or_default();
        if st.prev_ok && !ok {
            st.dropouts += 1;
        }
        st.prev_ok = ok;
        st.connected = pose.is_some();
        st.tracking_ok = ok;
        if let Some(pose) = pose {
            if ok {
                st.window.push(now_s, pose.position, pose.yaw_deg());
            }
            st.last_pos = Some(pose.position);
            st.last_yaw_deg = pose.yaw_deg();
        }
        let (pos_rms_m, yaw_std) = st.window.compute().unwrap_or((0.0, 0.0));
        st.jitter_pos_mm = pos_rms_m * 1000.0;
        st.jitter_yaw_deg = yaw_std;
    }
}

/// SHA-256 fingerprint of the geometric inputs, rounded to 1 mm / 0.001 so
/// pose noise does not thrash the cache.
fn coverage_fingerprint(play_area: &PlayArea, stations: &[StationPose]) -> String {
    let mut hasher = Sha256::new();
    for c in &play_area.corners {
        hasher.update(format!("{:.3},{:.3};", c.x, c.y));
    }
    for s in stations {
        hasher.update(s.serial.as_bytes());
        hasher.update(format!(
            ":{:.3},{:.3},{:.3};",
            s.position.x, s.position.y, s.position.z
        ));
        for row in &s.rotation.0 {
            hasher.update(format!("{:.3},{:.3},{:.3};", row[0], row[1], row[2]));
        }
    }
    hex::encode(hasher.finalize())
}

fn maybe_recompute_coverage(shared: &Arc<EngineShared>, state: &mut EngineState) {
    let Some(play_area) = state.play_area.clone() else {
        state.coverage_key = None;
        state.coverage = None;
        return;
    };
    if state.stations.len() != 2 {
        state.coverage_key = None;
        state.coverage = None;
        return;
    }
    let key = coverage_fingerprint(&play_area, &state.stations);
    if state.coverage.is_some() && state.coverage_key.as_deref() == Some(key.as_str()) {
        return;
    }
    state.coverage = Some(compute_coverage(
        &play_area,
        &state.stations,
        &shared.engine_cfg.coverage,
    ));
    state.coverage_key = Some(key);
}

// ── Diagnostic thread ─────────────────────────────────────────────────────────

/// Stage labels shown to the user while the scripted test runs. Thresholds
/// are absolute seconds into the run.
fn diagnostic_stage(t: f64) -> &'static str {
    if t < 10.0 {
        "0–10s: Stand still at center"
    } else if t < 25.0 {
        "10–25s: Slow 360° turn"
    } else if t < 35.0 {
        "25–35s: Squat + stand"
    } else if t < 50.0 {
        "35–50s: Step side-to-side"
    } else if t < 55.0 {
        "50–55s: Face Station A"
    } else if t < 60.0 {
        "55–60s: Face Station B"
    } else {
        "Finishing…"
    }
}

fn run_diagnostic(shared: &Arc<EngineShared>) {
    if let Err(e) = capture_session(shared) {
        warn!("diagnostic failed: {e}");
        let mut state = shared.state.write().expect("state lock");
        state.last_error = Some(format!("Diagnostic: {e}"));
    }
    {
        let mut state = shared.state.write().expect("state lock");
        state.diag_stage = "Idle".to_string();
        state.diag_t_s = 0.0;
    }
    *shared.diag_running.lock().expect("diag flag lock") = false;
}

fn capture_session(shared: &Arc<EngineShared>) -> Result<(), String> {
    let duration_s = shared.engine_cfg.diagnostic_duration_s;
    let rate_hz = shared.engine_cfg.diagnostic_rate_hz.max(1.0);
    let dt = Duration::from_secs_f64(1.0 / rate_hz);

    let roles = shared
        .state
        .read()
        .expect("state lock")
        .cfg
        .tracker_roles_by_serial();
    if roles.len() != 3 {
        return Err(DiagnosticError::TrackersNotSelected.to_string());
    }

    info!("diagnostic started ({duration_s:.0}s @ {rate_hz:.0}Hz)");
    let started = Instant::now();
    let mut samples: Vec<SessionSample> = Vec::new();

    while !shared.stop.load(Ordering::Acquire) {
        let t = started.elapsed().as_secs_f64();
        if t >= duration_s {
            break;
        }
        {
            let mut state = shared.state.write().expect("state lock");
            state.diag_stage = diagnostic_stage(t).to_string();
            state.diag_t_s = t;
        }

        let devices = shared.source.enumerate().map_err(|e| e.to_string())?;

        let hmd_yaw_deg = devices
            .iter()
            .filter(|d| d.class == DeviceClass::Hmd)
            .filter_map(|d| d.pose.as_ref())
            .find(|p| p.valid)
            .map(|p| p.yaw_deg());

        let mut trackers = std::collections::BTreeMap::new();
        for serial in roles.keys() {
            let sample = devices
                .iter()
                .find(|d| &d.serial == serial)
                .and_then(|d| d.pose.as_ref())
                .map(|p| TrackerSample {
                    pos: Some(p.position),
                    yaw_deg: Some(p.yaw_deg()),
                    ok: p.is_ok(),
                })
                .unwrap_or_else(TrackerSample::missing);
            trackers.insert(serial.clone(), sample);
        }

        samples.push(SessionSample {
            t_s: t,
            hmd_yaw_deg,
            trackers,
        });
        thread::sleep(dt);
    }

    // Compose the artifact from a consistent snapshot of the current state.
    let (play_area, stations, coverage_summary) = {
        let state = shared.state.read().expect("state lock");
        (
            state.play_area.clone(),
            state.stations.clone(),
            state.coverage.as_ref().map(|c| c.summary()),
        )
    };

    let artifact = SessionArtifact {
        timestamp: chrono::Local::now().format("%Y%m%d_%H%M%S").to_string(),
        duration_s,
        tracker_roles_by_serial: roles.clone(),
        stations: stations.iter().map(StationRecord::from).collect(),
        play_area,
        coverage_summary,
        samples,
    };

    let metrics = analyze_session(
        &artifact.samples,
        &roles,
        &stations,
        &shared.engine_cfg.coverage,
    );

    // A failed write is fatal to this attempt: nothing gets published.
    save_session(&shared.paths, &artifact).map_err(|e| e.to_string())?;

    let mut state = shared.state.write().expect("state lock");
    state.last_session = Some(artifact);
    state.last_metrics = Some(metrics);
    info!("diagnostic finished and published");
    Ok(())
}
