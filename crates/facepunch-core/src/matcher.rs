//! Gallery matching against an external verification primitive.
//!
//! Every gallery entry is compared with the probe. The verified candidate
//! with the smallest distance wins; ties go to the earlier gallery entry.
//! A comparison that fails or times out is skipped and never aborts the scan.

use crate::recognizer::RecognizerError;
use crate::types::{Capture, GalleryEntry, IdentityId};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Outcome of one probe/reference comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Verification {
    /// Non-negative dissimilarity. Lower = more similar.
    pub distance: f32,
    /// Whether the verification service considers the pair the same person.
    pub verified: bool,
}

#[derive(Error, Debug)]
pub enum ComparisonError {
    #[error("reference image {path}: {source}")]
    Reference {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("embedding failed: {0}")]
    Embedding(#[from] RecognizerError),
    #[error("comparison timed out after {0:?}")]
    TimedOut(Duration),
    #[error("comparison task failed: {0}")]
    Task(String),
}

/// Face verification primitive: compares a probe with one stored reference.
pub trait Verifier: Send + Sync {
    /// Per-probe work shared by every comparison, run once before the gallery scan.
    fn prepare(&self, _probe: &Capture) -> Result<(), ComparisonError> {
        Ok(())
    }

    fn verify(&self, probe: &Capture, reference: &Path) -> Result<Verification, ComparisonError>;
}

/// Result of matching a probe against the gallery.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchResult {
    /// The gallery was empty.
    NoCandidates,
    /// No comparison produced a verified candidate.
    NoMatch,
    Matched {
        identity_id: IdentityId,
        name: String,
        distance: f32,
    },
}

impl MatchResult {
    /// `1 - distance`, clamped to [0, 1]. `None` unless matched.
    pub fn confidence(&self) -> Option<f32> {
        match self {
            MatchResult::Matched { distance, .. } => Some(confidence_from_distance(*distance)),
            _ => None,
        }
    }
}

pub fn confidence_from_distance(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Pick the best verified candidate from comparison outcomes in gallery order.
pub fn select_best<'a, I>(outcomes: I) -> MatchResult
where
    I: IntoIterator<Item = (&'a GalleryEntry, Result<Verification, ComparisonError>)>,
{
    let mut seen = 0usize;
    let mut skipped = 0usize;
    let mut best: Option<(&GalleryEntry, f32)> = None;

    for (entry, outcome) in outcomes {
        seen += 1;
        let verification = match outcome {
            Ok(v) => v,
            Err(e) => {
                skipped += 1;
                tracing::warn!(
                    identity_id = entry.identity_id,
                    error = %e,
                    "comparison failed; skipping candidate"
                );
                continue;
            }
        };

        if !verification.distance.is_finite() || verification.distance < 0.0 {
            skipped += 1;
            tracing::warn!(
                identity_id = entry.identity_id,
                distance = verification.distance,
                "verification returned invalid distance; skipping candidate"
            );
            continue;
        }

        tracing::debug!(
            identity_id = entry.identity_id,
            distance = verification.distance,
            verified = verification.verified,
            "compared candidate"
        );

        if !verification.verified {
            continue;
        }
        let is_better = match best {
            None => true,
            Some((_, best_distance)) => verification.distance < best_distance,
        };
        if is_better {
            best = Some((entry, verification.distance));
        }
    }

    tracing::debug!(candidates = seen, skipped, "gallery scan complete");

    match best {
        Some((entry, distance)) => MatchResult::Matched {
            identity_id: entry.identity_id,
            name: entry.name.clone(),
            distance,
        },
        None if seen == 0 => MatchResult::NoCandidates,
        None => MatchResult::NoMatch,
    }
}

/// Concurrent gallery matcher with a per-comparison timeout.
pub struct FaceMatcher {
    verifier: Arc<dyn Verifier>,
    timeout: Duration,
    workers: usize,
}

impl FaceMatcher {
    /// `workers` bounds how many comparisons run at once (minimum 1).
    pub fn new(verifier: Arc<dyn Verifier>, timeout: Duration, workers: usize) -> Self {
        Self {
            verifier,
            timeout,
            workers: workers.max(1),
        }
    }

    /// Compare `probe` with every gallery entry and select the best verified one.
    ///
    /// Comparisons run on the blocking pool. A comparison still running at its
    /// timeout is abandoned: its result is discarded whenever it finishes.
    pub async fn match_probe(&self, probe: Arc<Capture>, gallery: &[GalleryEntry]) -> MatchResult {
        if gallery.is_empty() {
            return MatchResult::NoCandidates;
        }

        if let Err(e) = self.prepare_probe(Arc::clone(&probe)).await {
            tracing::warn!(error = %e, candidates = gallery.len(), "probe preparation failed");
            return MatchResult::NoMatch;
        }

        let permits = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();

        for (idx, entry) in gallery.iter().enumerate() {
            let verifier = Arc::clone(&self.verifier);
            let probe = Arc::clone(&probe);
            let permits = Arc::clone(&permits);
            let reference = entry.reference_image_path.clone();
            let limit = self.timeout;

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (idx, Err(ComparisonError::Task("worker pool closed".into())));
                };
                let handle =
                    tokio::task::spawn_blocking(move || verifier.verify(&probe, &reference));
                let outcome = match tokio::time::timeout(limit, handle).await {
                    Ok(Ok(outcome)) => outcome,
                    Ok(Err(join)) => Err(ComparisonError::Task(join.to_string())),
                    Err(_) => Err(ComparisonError::TimedOut(limit)),
                };
                (idx, outcome)
            });
        }

        let mut outcomes: Vec<Option<Result<Verification, ComparisonError>>> =
            gallery.iter().map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, outcome)) => outcomes[idx] = Some(outcome),
                Err(e) => tracing::warn!(error = %e, "comparison task panicked"),
            }
        }

        select_best(gallery.iter().zip(outcomes).map(|(entry, outcome)| {
            let outcome = outcome
                .unwrap_or_else(|| Err(ComparisonError::Task("comparison task lost".into())));
            (entry, outcome)
        }))
    }
}

impl FaceMatcher {
    async fn prepare_probe(&self, probe: Arc<Capture>) -> Result<(), ComparisonError> {
        let verifier = Arc::clone(&self.verifier);
        let handle = tokio::task::spawn_blocking(move || verifier.prepare(&probe));
        match tokio::time::timeout(self.timeout, handle).await {
            Ok(Ok(prepared)) => prepared,
            Ok(Err(join)) => Err(ComparisonError::Task(join.to_string())),
            Err(_) => Err(ComparisonError::TimedOut(self.timeout)),
        }
    }
}
