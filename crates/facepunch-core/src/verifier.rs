//! Embedding-based implementation of the verification primitive.
//!
//! Distance is cosine distance between embeddings. Reference images are
//! immutable once enrolled, so their embeddings are cached by path for the
//! lifetime of the verifier.

use crate::matcher::{ComparisonError, Verification, Verifier};
use crate::recognizer::Embedder;
use crate::types::{Capture, Embedding};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Cosine-distance threshold for ArcFace below which two faces verify.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.68;

pub struct EmbeddingVerifier<E> {
    embedder: E,
    threshold: f32,
    references: Mutex<HashMap<PathBuf, Embedding>>,
}

impl<E: Embedder> EmbeddingVerifier<E> {
    pub fn new(embedder: E, threshold: f32) -> Self {
        Self {
            embedder,
            threshold,
            references: Mutex::new(HashMap::new()),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Number of reference embeddings currently cached.
    pub fn cached_references(&self) -> usize {
        self.references.lock().map(|cache| cache.len()).unwrap_or(0)
    }

    fn reference_embedding(&self, path: &Path) -> Result<Embedding, ComparisonError> {
        if let Ok(cache) = self.references.lock() {
            if let Some(hit) = cache.get(path) {
                return Ok(hit.clone());
            }
        }

        let image = image::open(path)
            .map_err(|source| ComparisonError::Reference {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgb8();
        let embedding = self.embedder.embed(&image)?;
        tracing::debug!(path = %path.display(), "cached reference embedding");

        if let Ok(mut cache) = self.references.lock() {
            cache.insert(path.to_path_buf(), embedding.clone());
        }
        Ok(embedding)
    }
}

impl<E: Embedder> Verifier for EmbeddingVerifier<E> {
    fn prepare(&self, probe: &Capture) -> Result<(), ComparisonError> {
        probe.embedding_with(|image| self.embedder.embed(image))?;
        Ok(())
    }

    fn verify(&self, probe: &Capture, reference: &Path) -> Result<Verification, ComparisonError> {
        let reference = self.reference_embedding(reference)?;
        let probe = probe.embedding_with(|image| self.embedder.embed(image))?;

        let distance = probe.cosine_distance(&reference);
        Ok(Verification {
            distance,
            verified: distance <= self.threshold,
        })
    }
}
