//! Interface to the object-detection model and the data it produces.

pub mod yolo;

#[cfg(feature = "rten")]
pub mod rten_backend;

use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;

/// Box corners in pixel coordinates of the source image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = BoundingBox {
            x_min: self.x_min.max(other.x_min),
            y_min: self.y_min.max(other.y_min),
            x_max: self.x_max.min(other.x_max),
            y_max: self.y_max.min(other.y_max),
        }
        .area();
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }

    /// Clamp into `[0, width] x [0, height]`; `None` if nothing is left.
    pub fn clamped(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let (w, h) = (width as f32, height as f32);
        let clamped = BoundingBox {
            x_min: self.x_min.clamp(0.0, w),
            y_min: self.y_min.clamp(0.0, h),
            x_max: self.x_max.clamp(0.0, w),
            y_max: self.y_max.clamp(0.0, h),
        };
        (clamped.x_min < clamped.x_max && clamped.y_min < clamped.y_max).then_some(clamped)
    }

    pub fn is_within(&self, width: u32, height: u32) -> bool {
        let (w, h) = (width as f32, height as f32);
        self.x_min >= 0.0
            && self.y_min >= 0.0
            && self.x_max <= w
            && self.y_max <= h
            && self.x_min < self.x_max
            && self.y_min < self.y_max
    }
}

/// One object reported by the model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn is_valid_for(&self, width: u32, height: u32) -> bool {
        (0.0..=1.0).contains(&self.confidence) && self.bbox.is_within(width, height)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DetectionError {
    #[error("failed to load model: {0}")]
    Load(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

impl DetectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectionError::Load(_) => ErrorKind::ModelLoadFailure,
            DetectionError::Inference(_) => ErrorKind::InferenceFailure,
        }
    }
}

/// A loaded model that can be run on images.
pub trait Detector: Send + Sync {
    fn infer(&self, image: &DynamicImage) -> Result<Vec<Detection>, DetectionError>;
}

/// Turns a stored model artifact into a runnable [`Detector`].
pub trait ModelLoader: Send + Sync {
    type Model: Detector + 'static;

    fn load(&self, bytes: &[u8]) -> Result<Self::Model, DetectionError>;
}

/// Bring raw model output into the stored form: boxes clamped to the image,
/// confidences clamped to `[0, 1]`, degenerate boxes dropped. Order is kept.
pub fn sanitize_detections(raw: Vec<Detection>, width: u32, height: u32) -> Vec<Detection> {
    raw.into_iter()
        .filter_map(|d| {
            if !d.confidence.is_finite() {
                tracing::warn!(class_id = d.class_id, "dropping detection with non-finite confidence");
                return None;
            }
            match d.bbox.clamped(width, height) {
                Some(bbox) => Some(Detection {
                    class_id: d.class_id,
                    confidence: d.confidence.clamp(0.0, 1.0),
                    bbox,
                }),
                None => {
                    tracing::warn!(class_id = d.class_id, bbox = ?d.bbox, "dropping degenerate detection");
                    None
                }
            }
        })
        .collect()
}
