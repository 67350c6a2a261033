use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::info;
use vr_types::PoseSource;

use coach_backend::http_server;
use coach_backend::state_engine::{EngineConfig, StateEngine};
use coach_backend::storage::AppPaths;
use rig_simulator::scenarios::preset_by_name;
use rig_simulator::{RigConfig, SimulatedRig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coach_backend=info".into()),
        )
        .init();

    info!(
        "Lighthouse Layout Coach backend v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let paths = AppPaths::from_env();
    paths.ensure_dirs()?;
    info!("data directory: {}", paths.root.display());

    // The live OpenVR binding ships separately and plugs in through the
    // PoseSource trait; in this tree the scripted rig is the only source.
    let source_kind =
        std::env::var("COACH_POSE_SOURCE").unwrap_or_else(|_| "sim".to_string());
    let source: Arc<dyn PoseSource> = match source_kind.as_str() {
        "sim" => {
            let preset =
                std::env::var("COACH_SIM_PRESET").unwrap_or_else(|_| "default".to_string());
            let Some(scenario) = preset_by_name(&preset) else {
                bail!("unknown COACH_SIM_PRESET '{preset}'");
            };
            info!("pose source: simulated rig (preset '{preset}')");
            Arc::new(SimulatedRig::new(RigConfig::default(), scenario))
        }
        other => bail!("unknown COACH_POSE_SOURCE '{other}' (expected 'sim')"),
    };

    let engine = StateEngine::new(source, paths, EngineConfig::default());
    engine.start();

    let result = http_server::serve(engine.clone()).await;

    engine.stop();
    result
}
