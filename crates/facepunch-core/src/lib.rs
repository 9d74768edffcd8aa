//! facepunch-core: recognition-and-decision pipeline for a face attendance kiosk.
//!
//! Scores captures for liveness, matches them against the enrolled gallery via
//! an ArcFace embedding verifier running on ONNX Runtime, and derives the next
//! ENTRY/EXIT punch for the matched identity.

pub mod attendance;
pub mod liveness;
pub mod matcher;
pub mod recognizer;
pub mod response;
pub mod types;
pub mod verifier;

pub use attendance::PunchState;
pub use liveness::{LivenessAnalyzer, LivenessReport, DEFAULT_LIVENESS_THRESHOLD};
pub use matcher::{
    confidence_from_distance, select_best, ComparisonError, FaceMatcher, MatchResult,
    Verification, Verifier,
};
pub use recognizer::{Embedder, FaceRecognizer, RecognizerError};
pub use types::{
    AttendanceRecord, Capture, Embedding, GalleryEntry, HistoryEntry, Identity, IdentityId, Punch,
    PunchType, RecordId,
};
pub use verifier::{EmbeddingVerifier, DEFAULT_MATCH_THRESHOLD};

/// Default directory holding the ArcFace ONNX model.
pub fn default_model_dir() -> std::path::PathBuf {
    std::path::PathBuf::from("/usr/share/facepunch/models")
}
