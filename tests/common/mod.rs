mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from annolens for tests
pub use annolens::core::db::{
    ImageRepository, ImageStatus, NewImage, NewProject, Project, ProjectRepository, Store,
    UploadedImage,
};
pub use annolens::{BoundingBox, Detection, ErrorKind};
