//! ArcFace face embedder via ONNX Runtime.
//!
//! Extracts 512-dimensional embeddings from RGB captures using the w600k_r50
//! ArcFace model. Kiosk captures are framed on the face, so the input is a
//! centre square crop of the whole frame rather than a landmark-aligned crop.

use crate::types::Embedding;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

const ARCFACE_INPUT_SIZE: u32 = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5; // symmetric normalization, not 128.0
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}: download from insightface and place in the model dir")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("image is empty")]
    EmptyImage,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that turns a capture into a face embedding.
pub trait Embedder: Send + Sync {
    fn embed(&self, image: &RgbImage) -> Result<Embedding, RecognizerError>;
}

/// ArcFace-based face embedder.
pub struct FaceRecognizer {
    session: Mutex<Session>,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    /// Centre-crop to a square, resize to 112×112 and normalize into a NCHW tensor.
    fn preprocess(image: &RgbImage) -> Result<Array4<f32>, RecognizerError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(RecognizerError::EmptyImage);
        }

        let side = width.min(height);
        let crop = imageops::crop_imm(image, (width - side) / 2, (height - side) / 2, side, side)
            .to_image();
        let face = imageops::resize(&crop, ARCFACE_INPUT_SIZE, ARCFACE_INPUT_SIZE, FilterType::Triangle);

        let size = ARCFACE_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in face.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel.0[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD;
            }
        }

        Ok(tensor)
    }
}

impl Embedder for FaceRecognizer {
    fn embed(&self, image: &RgbImage) -> Result<Embedding, RecognizerError> {
        let input = Self::preprocess(image)?;

        let raw: Vec<f32> = {
            let mut session = self
                .session
                .lock()
                .map_err(|_| RecognizerError::InferenceFailed("session lock poisoned".into()))?;
            let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
            let (_, raw_data) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;
            raw_data.to_vec()
        };

        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "expected {ARCFACE_EMBEDDING_DIM}-dim embedding, got {}",
                raw.len()
            )));
        }

        Ok(Embedding {
            values: l2_normalize(raw),
            model_version: Some(ARCFACE_MODEL_VERSION.to_string()),
        })
    }
}

fn l2_normalize(raw: Vec<f32>) -> Vec<f32> {
    let norm: f32 = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw
    }
}
