use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use annolens::core::db::{NewProject, Project, ProjectRepository, Store};
use annolens::palette::ClassPalette;
use annolens::validation::{validate_class_file, validate_model_file, validate_project_meta};
use annolens::{BoundingBox, Detection, DetectionError, Detector, ModelLoader};
use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};

/// Encodes a solid gray image of the given size.
pub fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = ImageBuffer::from_fn(width, height, |_, _| Rgb([128u8, 128u8, 128u8]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), format)
        .expect("Failed to encode test image");
    bytes
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    image_bytes(width, height, ImageFormat::Png)
}

/// Opens a Store in a fresh temporary directory.
/// Returns both the store and the temp directory (which must be kept alive).
pub async fn create_test_store() -> (Store, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let store = Store::open(dir.path().join("test.db"))
        .await
        .expect("Failed to open test store");
    (store, dir)
}

pub const TEST_CLASSES: &str = "person:red\ncar\ndog:green\n";

/// Builds a validated NewProject with the given class file.
pub fn make_new_project(name: &str, class_file: &str) -> NewProject {
    let meta = validate_project_meta(name, "tester").expect("valid meta");
    let model = validate_model_file("model.rten", b"fake model".to_vec()).expect("valid model");
    let specs = validate_class_file(class_file.as_bytes()).expect("valid class file");
    NewProject {
        meta,
        model,
        palette: ClassPalette::resolve(&specs),
        class_file: class_file.to_string(),
    }
}

pub async fn create_test_project(store: &Store, name: &str) -> Project {
    store
        .create_project(make_new_project(name, TEST_CLASSES))
        .await
        .expect("Failed to create test project")
}

pub fn make_detection(class_id: usize, confidence: f32, b: [f32; 4]) -> Detection {
    Detection {
        class_id,
        confidence,
        bbox: BoundingBox {
            x_min: b[0],
            y_min: b[1],
            x_max: b[2],
            y_max: b[3],
        },
    }
}

/// Loader whose models return a fixed list of detections.
///
/// `fail_load` makes every load fail; `fail_inference` can be flipped while
/// models are alive to simulate a flaky backend.
#[derive(Clone, Default)]
pub struct FakeLoader {
    pub detections: Vec<Detection>,
    pub fail_load: bool,
    pub fail_inference: Arc<AtomicBool>,
    /// Images with this width fail inference regardless of the flag.
    pub fail_width: Option<u32>,
}

impl FakeLoader {
    pub fn returning(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            ..Self::default()
        }
    }
}

pub struct FakeModel {
    detections: Vec<Detection>,
    fail_inference: Arc<AtomicBool>,
    fail_width: Option<u32>,
}

impl ModelLoader for FakeLoader {
    type Model = FakeModel;

    fn load(&self, bytes: &[u8]) -> Result<FakeModel, DetectionError> {
        if self.fail_load || bytes.is_empty() {
            return Err(DetectionError::Load("not a model".into()));
        }
        Ok(FakeModel {
            detections: self.detections.clone(),
            fail_inference: Arc::clone(&self.fail_inference),
            fail_width: self.fail_width,
        })
    }
}

impl Detector for FakeModel {
    fn infer(&self, image: &DynamicImage) -> Result<Vec<Detection>, DetectionError> {
        if self.fail_inference.load(Ordering::SeqCst) || self.fail_width == Some(image.width()) {
            return Err(DetectionError::Inference("backend exploded".into()));
        }
        Ok(self.detections.clone())
    }
}
