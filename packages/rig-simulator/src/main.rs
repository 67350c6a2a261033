//! main.rs — standalone rig-simulator entry point
//!
//! Runs the scripted rig at a fixed rate and prints what a pose-source
//! consumer would see. Useful for eyeballing scenario presets and for piping
//! device streams into other tooling (`--dump` emits one JSON line per
//! tick).

use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{info, warn};

use rig_simulator::scenarios::preset_by_name;
use rig_simulator::{RigConfig, SimulatedRig};
use vr_types::PoseSource;

#[derive(Parser, Debug)]
#[command(name = "rig-sim", about = "Lighthouse Layout Coach rig simulator")]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,
    /// Scenario preset: default, occlusion, dropout, low_mount, misaim,
    /// no_chaperone
    #[arg(long, default_value = "default")]
    preset: String,
    /// Tick rate in Hz
    #[arg(long, default_value = "30.0")]
    rate: f64,
    /// How long to run, seconds (0 = forever)
    #[arg(long, default_value = "10.0")]
    duration: f64,
    /// Emit every tick's device list as a JSON line on stdout
    #[arg(long)]
    dump: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rig_simulator=info".into()),
        )
        .init();

    let args = Args::parse();

    let config_str = std::fs::read_to_string(&args.config)
        .unwrap_or_else(|_| include_str!("../config.toml").to_string());
    let cfg: RigConfig = match toml::from_str(&config_str) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("invalid {}: {e}; using built-in defaults", args.config);
            RigConfig::default()
        }
    };

    let Some(scenario) = preset_by_name(&args.preset) else {
        warn!("unknown preset '{}'", args.preset);
        std::process::exit(2);
    };

    info!(
        "rig-sim starting — preset '{}', {:.0} Hz, {}",
        args.preset,
        args.rate,
        if args.duration > 0.0 {
            format!("{:.0}s", args.duration)
        } else {
            "until interrupted".to_string()
        }
    );

    let rig = SimulatedRig::new(cfg, scenario);
    while let Err(e) = rig.init() {
        info!("waiting for simulated runtime: {e}");
        std::thread::sleep(Duration::from_millis(200));
    }

    let dt = Duration::from_secs_f64(1.0 / args.rate.max(1.0));
    let started = Instant::now();
    let mut ticks = 0u64;
    let report_every = args.rate.max(1.0) as u64;

    loop {
        let elapsed = started.elapsed().as_secs_f64();
        if args.duration > 0.0 && elapsed >= args.duration {
            break;
        }
        match rig.enumerate() {
            Ok(devices) => {
                ticks += 1;
                if args.dump {
                    match serde_json::to_string(&devices) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!("serialize failed: {e}"),
                    }
                }
                if ticks % report_every == 0 {
                    let ok = devices
                        .iter()
                        .filter(|d| d.pose.as_ref().is_some_and(|p| p.is_ok()))
                        .count();
                    info!(
                        "t={elapsed:.1}s | devices={} | tracking_ok={ok}",
                        devices.len()
                    );
                }
            }
            Err(e) => warn!("enumerate failed: {e}"),
        }
        std::thread::sleep(dt);
    }

    info!("rig-sim done — {ticks} ticks in {:.1}s", started.elapsed().as_secs_f64());
}
