pub mod config;
pub mod core;
pub mod detection;
pub mod error;
pub mod palette;
pub mod presentation;
pub mod render;
pub mod validation;
pub mod workbench;

pub use config::Config;
pub use crate::core::db::{ImageRepository, ProjectRepository, Store};
pub use detection::{BoundingBox, Detection, DetectionError, Detector, ModelLoader};
pub use error::{Error, ErrorKind, Result, ValidationError, ValidationErrors};
pub use palette::{ClassPalette, NamedColor};
pub use render::{LabelFont, Renderer};
pub use workbench::{CreateProject, UploadOutcome, Workbench};
