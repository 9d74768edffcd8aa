use anyhow::{Context, Result};
use facepunch_core::{EmbeddingVerifier, FaceMatcher, FaceRecognizer, LivenessAnalyzer};
use facepunch_store::{ReferenceVault, SqliteStore};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod ingest;

use config::{BusKind, Config};
use dbus_interface::AttendanceService;
use engine::Engine;

const BUS_NAME: &str = "io.facepunch.Attendance1";
const OBJECT_PATH: &str = "/io/facepunch/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facepunchd starting");

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        faces = %config.faces_dir.display(),
        models = %config.model_dir.display(),
        liveness_threshold = config.liveness_threshold,
        match_threshold = config.match_threshold,
        "configuration loaded"
    );

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store = SqliteStore::open(&config.db_path)
        .with_context(|| format!("opening {}", config.db_path.display()))?;
    let vault = ReferenceVault::open(&config.faces_dir)
        .with_context(|| format!("opening {}", config.faces_dir.display()))?;

    let model_path = config.arcface_model_path();
    let recognizer = FaceRecognizer::load(&model_path)
        .with_context(|| format!("loading recognition model {model_path}"))?;
    let verifier = EmbeddingVerifier::new(recognizer, config.match_threshold);
    let matcher = FaceMatcher::new(
        Arc::new(verifier),
        Duration::from_secs(config.verify_timeout_secs),
        config.match_workers,
    );

    let engine = Engine::new(
        Arc::new(store),
        vault,
        LivenessAnalyzer::new(config.liveness_threshold),
        matcher,
    );
    let service = AttendanceService::new(Arc::new(engine), config.clone());

    let builder = match config.bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("claiming {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "facepunchd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facepunchd shutting down");

    Ok(())
}
