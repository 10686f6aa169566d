use time::OffsetDateTime;
use uuid::Uuid;

use crate::detection::Detection;
use crate::palette::ClassPalette;
use crate::validation::{ModelUpload, ProjectMeta};

#[derive(Debug, Clone)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub creator: String,
    /// Opaque handle to the stored model artifact.
    pub model_reference: Uuid,
    pub model_file_name: String,
    pub palette: ClassPalette,
    /// Class file exactly as uploaded.
    pub class_file: String,
    pub created_at: OffsetDateTime,
}

/// Everything needed to create a project; all of it has been validated.
#[derive(Debug, Clone)]
pub struct NewProject {
    pub meta: ProjectMeta,
    pub model: ModelUpload,
    pub palette: ClassPalette,
    pub class_file: String,
}

#[derive(Debug, Clone)]
pub struct ProjectSummary {
    pub id: i64,
    pub name: String,
    pub creator: String,
    pub class_count: i64,
    pub image_count: i64,
    pub pending_count: i64,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub reference: Uuid,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStatus {
    /// Stored, but no processed result yet.
    Pending,
    Complete,
}

impl std::fmt::Display for ImageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageStatus::Pending => f.write_str("pending"),
            ImageStatus::Complete => f.write_str("complete"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub project_id: i64,
    pub file_name: String,
    pub original_bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub id: i64,
    pub project_id: i64,
    pub file_name: String,
    pub original_bytes: Vec<u8>,
    pub processed_bytes: Option<Vec<u8>>,
    pub detections: Vec<Detection>,
    pub uploaded_at: OffsetDateTime,
    pub processed_at: Option<OffsetDateTime>,
}

impl UploadedImage {
    pub fn status(&self) -> ImageStatus {
        if self.processed_bytes.is_some() {
            ImageStatus::Complete
        } else {
            ImageStatus::Pending
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status() == ImageStatus::Pending
    }
}

#[derive(Debug, Clone)]
pub struct ImageSummary {
    pub id: i64,
    pub project_id: i64,
    pub file_name: String,
    pub status: ImageStatus,
    pub detection_count: i64,
    pub uploaded_at: OffsetDateTime,
}
