use chrono::{DateTime, NaiveDate, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

/// Store-assigned handle of an enrolled identity.
pub type IdentityId = i64;

/// Store-assigned handle of an attendance record.
pub type RecordId = i64;

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    /// Cosine similarity in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Cosine distance `1 - similarity`, in [0, 2]. Lower = more similar.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        (1.0 - self.similarity(other)).max(0.0)
    }
}

/// Kind of attendance punch. Alternates per identity and day, starting with `Entry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PunchType {
    Entry,
    Exit,
}

impl PunchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunchType::Entry => "ENTRY",
            PunchType::Exit => "EXIT",
        }
    }

    /// Parse the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ENTRY" => Some(PunchType::Entry),
            "EXIT" => Some(PunchType::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for PunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An enrolled user. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    pub name: String,
    pub reference_image_path: PathBuf,
    pub registered_at: DateTime<Utc>,
}

/// One gallery slot the matcher compares a probe against.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub identity_id: IdentityId,
    pub name: String,
    pub reference_image_path: PathBuf,
}

/// A committed attendance punch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: RecordId,
    pub identity_id: IdentityId,
    pub punch_type: PunchType,
    pub timestamp: DateTime<Utc>,
    /// Local calendar day the punch counts towards.
    pub day: NaiveDate,
    /// `1 - distance` of the match, clamped to [0, 1].
    pub confidence: f32,
}

/// Punch type and time, as returned by "today's punches" queries.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Punch {
    pub punch_type: PunchType,
    pub timestamp: DateTime<Utc>,
}

/// One row of the attendance history view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub name: String,
    pub punch_type: PunchType,
    pub timestamp: DateTime<Utc>,
    pub confidence: f32,
}

/// A decoded probe image, with its embedding computed at most once.
#[derive(Debug)]
pub struct Capture {
    pub image: RgbImage,
    embedding: OnceLock<Embedding>,
    init: Mutex<()>,
}

impl Capture {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            embedding: OnceLock::new(),
            init: Mutex::new(()),
        }
    }

    /// Return the cached embedding, computing it with `extract` on first use.
    ///
    /// Concurrent first callers wait for the one running `extract` instead of
    /// running it themselves. A failed `extract` leaves the slot empty.
    pub fn embedding_with<E>(
        &self,
        extract: impl FnOnce(&RgbImage) -> Result<Embedding, E>,
    ) -> Result<&Embedding, E> {
        if let Some(embedding) = self.embedding.get() {
            return Ok(embedding);
        }
        let _guard = match self.init.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(embedding) = self.embedding.get() {
            return Ok(embedding);
        }
        let computed = extract(&self.image)?;
        Ok(self.embedding.get_or_init(|| computed))
    }
}
