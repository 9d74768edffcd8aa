use crate::config::Config;
use crate::engine::{AuthOutcome, Engine, EngineError, RegistrationOutcome};
use crate::ingest;
use facepunch_core::response::{
    AuthenticateResponse, HistoryItem, HistoryResponse, RegisterResponse, UserItem, UsersResponse,
    DISPLAY_TIME_FORMAT,
};
use serde::Serialize;
use std::sync::Arc;
use zbus::interface;

/// D-Bus interface for the attendance daemon.
///
/// Bus name: io.facepunch.Attendance1
/// Object path: /io/facepunch/Attendance1
///
/// Every method returns a JSON document. Workflow failures (spoof, unknown
/// face, duplicate name) are reported in the document with `success: false`;
/// D-Bus errors are reserved for serialization failures.
pub struct AttendanceService {
    engine: Arc<Engine>,
    config: Config,
}

impl AttendanceService {
    pub fn new(engine: Arc<Engine>, config: Config) -> Self {
        Self { engine, config }
    }
}

#[interface(name = "io.facepunch.Attendance1")]
impl AttendanceService {
    /// Enroll `name` with an encoded (JPEG/PNG) capture as its reference.
    async fn register(&self, name: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(name, bytes = image.len(), "register requested");

        let response = match self.register_inner(name, image).await {
            Ok(outcome) => RegisterResponse::from(outcome),
            Err(e) => RegisterResponse::failure(report(&e, "register")),
        };
        to_json(&response)
    }

    /// Authenticate an encoded capture and record the next punch for the match.
    async fn authenticate(&self, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(bytes = image.len(), "authenticate requested");

        let response = match self.authenticate_inner(image).await {
            Ok(outcome) => AuthenticateResponse::from(outcome),
            Err(e) => AuthenticateResponse::failure(report(&e, "authenticate"), None),
        };
        to_json(&response)
    }

    /// Punches of the last `days` days, most recent first.
    async fn history(&self, days: u32) -> zbus::fdo::Result<String> {
        tracing::debug!(days, "history requested");

        let response = match self.engine.history(days).await {
            Ok(entries) => HistoryResponse {
                success: true,
                history: entries.iter().map(HistoryItem::from).collect(),
                message: None,
            },
            Err(e) => HistoryResponse {
                message: Some(report(&e, "history")),
                ..Default::default()
            },
        };
        to_json(&response)
    }

    /// Registered identities, ordered by id.
    async fn list_users(&self) -> zbus::fdo::Result<String> {
        let response = match self.engine.users().await {
            Ok(users) => UsersResponse {
                success: true,
                users: users
                    .into_iter()
                    .map(|(id, name)| UserItem { id, name })
                    .collect(),
                message: None,
            },
            Err(e) => UsersResponse {
                message: Some(report(&e, "list_users")),
                ..Default::default()
            },
        };
        to_json(&response)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let identities = match self.engine.users().await {
            Ok(users) => Some(users.len()),
            Err(e) => {
                tracing::warn!(error = %e, "status: identity count unavailable");
                None
            }
        };
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "identities": identities,
            "liveness_threshold": self.config.liveness_threshold,
            "match_threshold": self.config.match_threshold,
            "verify_timeout_secs": self.config.verify_timeout_secs,
            "match_workers": self.config.match_workers,
            "model": self.config.arcface_model_path(),
            "db_path": self.config.db_path,
            "faces_dir": self.config.faces_dir,
            "bus": self.config.bus,
        })
        .to_string())
    }
}

impl AttendanceService {
    async fn register_inner(
        &self,
        name: &str,
        image: Vec<u8>,
    ) -> Result<RegistrationOutcome, EngineError> {
        let image = ingest::decode(image).await?;
        self.engine.register(name, image).await
    }

    async fn authenticate_inner(&self, image: Vec<u8>) -> Result<AuthOutcome, EngineError> {
        let image = ingest::decode(image).await?;
        self.engine.authenticate(image).await
    }
}

impl From<RegistrationOutcome> for RegisterResponse {
    fn from(outcome: RegistrationOutcome) -> Self {
        match outcome {
            RegistrationOutcome::LivenessRejected { score } => RegisterResponse {
                liveness_score: Some(score),
                ..RegisterResponse::failure(format!(
                    "Liveness check failed. Please use a live camera feed. (Score: {score:.2})"
                ))
            },
            RegistrationOutcome::NameTaken => RegisterResponse::failure("User already exists!"),
            RegistrationOutcome::Registered {
                identity_id,
                name,
                liveness_score,
            } => RegisterResponse {
                success: true,
                message: format!("User {name} registered successfully!"),
                identity_id: Some(identity_id),
                liveness_score: Some(liveness_score),
            },
        }
    }
}

impl From<AuthOutcome> for AuthenticateResponse {
    fn from(outcome: AuthOutcome) -> Self {
        match outcome {
            AuthOutcome::LivenessRejected { score } => AuthenticateResponse::failure(
                format!("Spoof detected! Liveness score: {score:.2}"),
                Some(score),
            ),
            AuthOutcome::NoCandidates { liveness_score } => {
                AuthenticateResponse::failure("No registered users found!", Some(liveness_score))
            }
            AuthOutcome::NoMatch { liveness_score } => {
                AuthenticateResponse::failure("Face not recognized!", Some(liveness_score))
            }
            AuthOutcome::Punched {
                name,
                record,
                liveness_score,
            } => AuthenticateResponse {
                success: true,
                message: Some(format!("{} recorded for {name}", record.punch_type)),
                name: Some(name),
                punch_type: Some(record.punch_type),
                confidence: Some(record.confidence),
                liveness_score: Some(liveness_score),
                timestamp: Some(
                    record
                        .timestamp
                        .with_timezone(&chrono::Local)
                        .format(DISPLAY_TIME_FORMAT)
                        .to_string(),
                ),
            },
        }
    }
}

/// Log an engine failure and return the message shown to the caller.
fn report(error: &EngineError, method: &str) -> String {
    match error {
        EngineError::Ingest(_) | EngineError::InvalidName(_) => {
            tracing::warn!(method, error = %error, "request rejected");
        }
        _ => tracing::error!(method, error = %error, "request failed"),
    }
    error.user_message()
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}
