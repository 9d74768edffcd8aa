use crate::ingest::IngestError;
use facepunch_core::{
    confidence_from_distance, AttendanceRecord, Capture, FaceMatcher, HistoryEntry, IdentityId,
    LivenessAnalyzer, LivenessReport, MatchResult,
};
use facepunch_store::{AttendanceStore, NewIdentity, ReferenceVault, StoreError, VaultError};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

const MAX_NAME_LEN: usize = 64;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("reference vault error: {0}")]
    Vault(#[from] VaultError),
    #[error("image ingest error: {0}")]
    Ingest(#[from] IngestError),
    #[error("invalid name: {0}")]
    InvalidName(&'static str),
    #[error("worker task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl EngineError {
    /// Message safe to show at the kiosk. Details stay in the daemon log.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::Ingest(_) => "Could not read the captured image.".to_string(),
            EngineError::InvalidName(reason) => format!("Invalid name: {reason}."),
            _ => "Internal error, please try again.".to_string(),
        }
    }
}

/// Result of a registration attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    LivenessRejected {
        score: f32,
    },
    NameTaken,
    Registered {
        identity_id: IdentityId,
        name: String,
        liveness_score: f32,
    },
}

/// Result of an authentication attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    LivenessRejected {
        score: f32,
    },
    NoCandidates {
        liveness_score: f32,
    },
    NoMatch {
        liveness_score: f32,
    },
    Punched {
        name: String,
        record: AttendanceRecord,
        liveness_score: f32,
    },
}

/// Registration and punch workflows over an injected store and matcher.
pub struct Engine {
    store: Arc<dyn AttendanceStore>,
    vault: ReferenceVault,
    liveness: LivenessAnalyzer,
    matcher: FaceMatcher,
}

impl Engine {
    pub fn new(
        store: Arc<dyn AttendanceStore>,
        vault: ReferenceVault,
        liveness: LivenessAnalyzer,
        matcher: FaceMatcher,
    ) -> Self {
        Self {
            store,
            vault,
            liveness,
            matcher,
        }
    }

    /// Enroll `name` with `image` as its reference, behind the liveness gate.
    ///
    /// Either the identity row and its reference file are both committed, or
    /// neither is. An existing identity's reference is never touched.
    pub async fn register(&self, name: &str, image: RgbImage) -> Result<RegistrationOutcome, EngineError> {
        let name = validate_name(name)?;
        let image = Arc::new(image);

        let report = self.check_liveness(Arc::clone(&image)).await?;
        if !report.is_live {
            tracing::info!(name = %name, score = report.score, "registration rejected: liveness");
            return Ok(RegistrationOutcome::LivenessRejected {
                score: report.score,
            });
        }

        let store = Arc::clone(&self.store);
        let vault = self.vault.clone();
        // Runs to completion even if the caller goes away, so the file/row pair
        // cannot be left half-written by cancellation.
        let outcome = tokio::task::spawn_blocking(move || {
            enroll_blocking(store.as_ref(), &vault, name, &image, report.score)
        })
        .await??;

        match &outcome {
            RegistrationOutcome::Registered {
                identity_id, name, ..
            } => tracing::info!(identity_id, name = %name, score = report.score, "registered"),
            RegistrationOutcome::NameTaken => tracing::info!("registration rejected: name taken"),
            RegistrationOutcome::LivenessRejected { .. } => {}
        }
        Ok(outcome)
    }

    /// Liveness, gallery match, then one alternating punch for the matched identity.
    pub async fn authenticate(&self, image: RgbImage) -> Result<AuthOutcome, EngineError> {
        let capture = Arc::new(Capture::new(image));

        let report = {
            let capture = Arc::clone(&capture);
            let analyzer = self.liveness;
            tokio::task::spawn_blocking(move || analyzer.analyze(&capture.image)).await?
        };
        let liveness_score = report.score;
        if !report.is_live {
            tracing::info!(score = liveness_score, "authentication rejected: liveness");
            return Ok(AuthOutcome::LivenessRejected {
                score: liveness_score,
            });
        }

        let gallery = {
            let store = Arc::clone(&self.store);
            tokio::task::spawn_blocking(move || store.gallery()).await??
        };
        tracing::debug!(candidates = gallery.len(), "matching probe against gallery");

        match self.matcher.match_probe(capture, &gallery).await {
            MatchResult::NoCandidates => {
                tracing::info!("authentication failed: gallery is empty");
                Ok(AuthOutcome::NoCandidates { liveness_score })
            }
            MatchResult::NoMatch => {
                tracing::info!(candidates = gallery.len(), "authentication failed: no match");
                Ok(AuthOutcome::NoMatch { liveness_score })
            }
            MatchResult::Matched {
                identity_id,
                name,
                distance,
            } => {
                let confidence = confidence_from_distance(distance);
                let store = Arc::clone(&self.store);
                let record =
                    tokio::task::spawn_blocking(move || store.punch(identity_id, confidence))
                        .await??;

                tracing::info!(
                    identity_id,
                    name = %name,
                    punch = %record.punch_type,
                    confidence,
                    liveness = liveness_score,
                    "punch recorded"
                );
                Ok(AuthOutcome::Punched {
                    name,
                    record,
                    liveness_score,
                })
            }
        }
    }

    pub async fn history(&self, days: u32) -> Result<Vec<HistoryEntry>, EngineError> {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.history(days)).await??)
    }

    pub async fn users(&self) -> Result<Vec<(IdentityId, String)>, EngineError> {
        let store = Arc::clone(&self.store);
        Ok(tokio::task::spawn_blocking(move || store.list_identities()).await??)
    }

    async fn check_liveness(&self, image: Arc<RgbImage>) -> Result<LivenessReport, EngineError> {
        let analyzer = self.liveness;
        Ok(tokio::task::spawn_blocking(move || analyzer.analyze(&image)).await?)
    }
}

fn validate_name(name: &str) -> Result<String, EngineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(EngineError::InvalidName("name is empty"));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(EngineError::InvalidName("name is longer than 64 characters"));
    }
    if name.chars().any(char::is_control) {
        return Err(EngineError::InvalidName("name contains control characters"));
    }
    Ok(name.to_string())
}

fn enroll_blocking(
    store: &dyn AttendanceStore,
    vault: &ReferenceVault,
    name: String,
    image: &RgbImage,
    liveness_score: f32,
) -> Result<RegistrationOutcome, EngineError> {
    if store.find_identity_by_name(&name)?.is_some() {
        return Ok(RegistrationOutcome::NameTaken);
    }

    let path = vault.save(&name, image)?;
    match store.create_identity(&name, &path) {
        Ok(NewIdentity::Created(identity_id)) => Ok(RegistrationOutcome::Registered {
            identity_id,
            name,
            liveness_score,
        }),
        Ok(NewIdentity::NameTaken) => {
            // lost a race with a concurrent registration of the same name
            vault.discard(&path);
            Ok(RegistrationOutcome::NameTaken)
        }
        Err(e) => {
            vault.discard(&path);
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use facepunch_core::{ComparisonError, PunchType, Verification, Verifier};
    use facepunch_store::{ManualClock, SqliteStore};
    use image::Rgb;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Compares pixels directly: identical images have distance 0.
    struct PixelVerifier;

    impl Verifier for PixelVerifier {
        fn verify(&self, probe: &Capture, reference: &Path) -> Result<Verification, ComparisonError> {
            let reference = image::open(reference)
                .map_err(|source| ComparisonError::Reference {
                    path: reference.to_path_buf(),
                    source,
                })?
                .to_rgb8();
            if reference.dimensions() != probe.image.dimensions() {
                return Ok(Verification { distance: 1.0, verified: false });
            }
            let total: u64 = probe
                .image
                .as_raw()
                .iter()
                .zip(reference.as_raw())
                .map(|(a, b)| a.abs_diff(*b) as u64)
                .sum();
            let distance = total as f32 / (probe.image.as_raw().len() as f32 * 255.0);
            Ok(Verification { distance, verified: distance < 0.05 })
        }
    }

    /// A sharp, colourful face stand-in; distinct per `person`.
    fn face(person: u8) -> RgbImage {
        RgbImage::from_fn(32, 32, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([250, person.wrapping_mul(60), 30])
            } else {
                Rgb([10, 100, person.wrapping_mul(60)])
            }
        })
    }

    fn flat_photo() -> RgbImage {
        RgbImage::from_pixel(32, 32, Rgb([128, 128, 128]))
    }

    struct Harness {
        engine: Arc<Engine>,
        store: Arc<SqliteStore>,
        clock: Arc<ManualClock>,
        faces: TempDir,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).unwrap()));
        let store = Arc::new(SqliteStore::open_in_memory(clock.clone()).unwrap());
        let faces = tempfile::tempdir().unwrap();
        let vault = ReferenceVault::open(faces.path()).unwrap();
        let matcher = FaceMatcher::new(Arc::new(PixelVerifier), Duration::from_secs(5), 4);
        let engine = Engine::new(store.clone(), vault, LivenessAnalyzer::default(), matcher);
        Harness {
            engine: Arc::new(engine),
            store,
            clock,
            faces,
        }
    }

    fn files_in(dir: &Path) -> Vec<std::path::PathBuf> {
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| e.path())
            .collect();
        files.sort();
        files
    }

    async fn punch_type(h: &Harness, image: RgbImage) -> PunchType {
        match h.engine.authenticate(image).await.unwrap() {
            AuthOutcome::Punched { record, .. } => record.punch_type,
            other => panic!("expected a punch, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_register_then_name_taken() {
        let h = harness();
        let first = h.engine.register("alice", face(1)).await.unwrap();
        let RegistrationOutcome::Registered { identity_id, liveness_score, .. } = first else {
            panic!("expected registration, got {first:?}");
        };
        assert!(liveness_score > 0.5);
        let files = files_in(h.faces.path());
        assert_eq!(files.len(), 1);
        let first_bytes = std::fs::read(&files[0]).unwrap();

        let second = h.engine.register("alice", face(2)).await.unwrap();
        assert_eq!(second, RegistrationOutcome::NameTaken);

        assert_eq!(h.store.list_identities().unwrap(), vec![(identity_id, "alice".to_string())]);
        assert_eq!(files_in(h.faces.path()), files);
        assert_eq!(std::fs::read(&files[0]).unwrap(), first_bytes);
    }

    #[tokio::test]
    async fn test_register_spoof_writes_nothing() {
        let h = harness();
        let outcome = h.engine.register("mallory", flat_photo()).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::LivenessRejected { score } if score == 0.0));
        assert!(h.store.list_identities().unwrap().is_empty());
        assert!(files_in(h.faces.path()).is_empty());
    }

    #[tokio::test]
    async fn test_register_trims_and_validates_name() {
        let h = harness();
        let outcome = h.engine.register("  bob  ", face(3)).await.unwrap();
        assert!(matches!(outcome, RegistrationOutcome::Registered { ref name, .. } if name == "bob"));
        assert!(matches!(
            h.engine.register("   ", face(4)).await,
            Err(EngineError::InvalidName(_))
        ));
        assert!(matches!(
            h.engine.register(&"x".repeat(65), face(4)).await,
            Err(EngineError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_same_name_registers_once() {
        let h = harness();
        let a = h.engine.clone();
        let b = h.engine.clone();
        let (ra, rb) = tokio::join!(a.register("carol", face(1)), b.register("carol", face(2)));
        let outcomes = [ra.unwrap(), rb.unwrap()];
        let registered = outcomes
            .iter()
            .filter(|o| matches!(o, RegistrationOutcome::Registered { .. }))
            .count();
        assert_eq!(registered, 1);
        assert!(outcomes.contains(&RegistrationOutcome::NameTaken));
        assert_eq!(h.store.list_identities().unwrap().len(), 1);
        assert_eq!(files_in(h.faces.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_gallery_is_no_candidates() {
        let h = harness();
        let outcome = h.engine.authenticate(face(1)).await.unwrap();
        assert!(matches!(outcome, AuthOutcome::NoCandidates { .. }));
        assert!(h.store.history(7).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spoof_is_rejected_before_matching() {
        let h = harness();
        h.engine.register("alice", face(1)).await.unwrap();
        let outcome = h.engine.authenticate(flat_photo()).await.unwrap();
        assert_eq!(outcome, AuthOutcome::LivenessRejected { score: 0.0 });
        assert!(h.store.history(7).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_face_is_no_match_and_writes_nothing() {
        let h = harness();
        h.engine.register("alice", face(1)).await.unwrap();
        let outcome = h.engine.authenticate(face(3)).await.unwrap();
        assert!(matches!(outcome, AuthOutcome::NoMatch { .. }));
        assert!(h.store.history(7).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_punches_alternate_entry_exit_entry() {
        let h = harness();
        h.engine.register("alice", face(1)).await.unwrap();

        assert_eq!(punch_type(&h, face(1)).await, PunchType::Entry);
        h.clock.advance(chrono::Duration::hours(4));
        assert_eq!(punch_type(&h, face(1)).await, PunchType::Exit);
        h.clock.advance(chrono::Duration::minutes(30));
        assert_eq!(punch_type(&h, face(1)).await, PunchType::Entry);

        let history = h.engine.history(7).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].punch_type, PunchType::Entry);
        assert_eq!(history[1].punch_type, PunchType::Exit);
        assert!(history.iter().all(|e| e.name == "alice" && e.confidence == 1.0));
    }

    #[tokio::test]
    async fn test_matched_identity_is_the_one_punched() {
        let h = harness();
        h.engine.register("alice", face(1)).await.unwrap();
        h.engine.register("bob", face(2)).await.unwrap();

        match h.engine.authenticate(face(2)).await.unwrap() {
            AuthOutcome::Punched { name, record, liveness_score } => {
                assert_eq!(name, "bob");
                assert_eq!(record.punch_type, PunchType::Entry);
                assert!(liveness_score > 0.5);
            }
            other => panic!("expected bob's punch, got {other:?}"),
        }
        assert_eq!(punch_type(&h, face(1)).await, PunchType::Entry);
    }

    #[tokio::test]
    async fn test_broken_reference_does_not_block_matching() {
        let h = harness();
        h.engine.register("bob", face(2)).await.unwrap();
        h.engine.register("alice", face(1)).await.unwrap();
        let bob = h.store.find_identity_by_name("bob").unwrap().unwrap();
        std::fs::write(&bob.reference_image_path, b"corrupted").unwrap();

        match h.engine.authenticate(face(1)).await.unwrap() {
            AuthOutcome::Punched { name, .. } => assert_eq!(name, "alice"),
            other => panic!("expected alice's punch, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_authentications_never_double_punch() {
        let h = harness();
        h.engine.register("alice", face(1)).await.unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..6 {
            let engine = h.engine.clone();
            tasks.spawn(async move { engine.authenticate(face(1)).await });
        }
        let mut records = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined.unwrap().unwrap() {
                AuthOutcome::Punched { record, .. } => records.push(record),
                other => panic!("expected a punch, got {other:?}"),
            }
        }
        records.sort_by_key(|r| r.id);
        let types: Vec<PunchType> = records.iter().map(|r| r.punch_type).collect();
        assert_eq!(
            types,
            vec![
                PunchType::Entry,
                PunchType::Exit,
                PunchType::Entry,
                PunchType::Exit,
                PunchType::Entry,
                PunchType::Exit
            ]
        );
    }

    #[test]
    fn test_user_messages_hide_internals() {
        let err = EngineError::Store(StoreError::LockPoisoned);
        assert_eq!(err.user_message(), "Internal error, please try again.");
        assert_eq!(
            EngineError::InvalidName("name is empty").user_message(),
            "Invalid name: name is empty."
        );
    }
}
