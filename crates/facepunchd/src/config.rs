use serde::Serialize;
use std::path::PathBuf;
use std::str::FromStr;

/// Which message bus the daemon claims its name on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory containing the ArcFace ONNX model.
    pub model_dir: PathBuf,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Directory holding enrolled reference images.
    pub faces_dir: PathBuf,
    /// Liveness score a capture must exceed to be accepted.
    pub liveness_threshold: f32,
    /// Cosine distance at or below which a comparison verifies.
    pub match_threshold: f32,
    /// Timeout in seconds for a single gallery comparison.
    pub verify_timeout_secs: u64,
    /// Number of gallery comparisons run concurrently.
    pub match_workers: usize,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `FACEPUNCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let model_dir = std::env::var("FACEPUNCH_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| facepunch_core::default_model_dir());

        let data_dir = data_home().join("facepunch");

        let db_path = std::env::var("FACEPUNCH_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let faces_dir = std::env::var("FACEPUNCH_FACES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces"));

        let bus = match std::env::var("FACEPUNCH_BUS").as_deref() {
            Ok("system") => BusKind::System,
            _ => BusKind::Session,
        };

        Self {
            model_dir,
            db_path,
            faces_dir,
            liveness_threshold: env_or(
                "FACEPUNCH_LIVENESS_THRESHOLD",
                facepunch_core::DEFAULT_LIVENESS_THRESHOLD,
            ),
            match_threshold: env_or(
                "FACEPUNCH_MATCH_THRESHOLD",
                facepunch_core::DEFAULT_MATCH_THRESHOLD,
            ),
            verify_timeout_secs: env_or("FACEPUNCH_VERIFY_TIMEOUT_SECS", 10),
            match_workers: env_or("FACEPUNCH_MATCH_WORKERS", 4),
            bus,
        }
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join("w600k_r50.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

/// `$XDG_DATA_HOME`, or `~/.local/share` when unset or empty.
fn data_home() -> PathBuf {
    match std::env::var_os("XDG_DATA_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local/share"),
    }
}

/// Parse `key` as `T`, falling back to `default` when unset or malformed.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        Err(_) => default,
    }
}
