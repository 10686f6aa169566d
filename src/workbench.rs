use std::io::Cursor;
use std::sync::Arc;

use image::{DynamicImage, ImageFormat};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::core::db::{
    ImageRepository, ImageSummary, NewImage, NewProject, Project, ProjectRepository,
    ProjectSummary, UploadedImage,
};
use crate::detection::{Detection, Detector, ModelLoader, sanitize_detections};
use crate::error::{Error, Result, ValidationError, ValidationErrors};
use crate::palette::ClassPalette;
use crate::render::{ClassIdOutOfRange, Renderer};
use crate::validation::{
    ImageHeader, inspect_image, validate_class_file, validate_model_file, validate_project_meta,
};

/// Raw inputs for a new project, straight from the uploader.
#[derive(Debug, Clone)]
pub struct CreateProject {
    pub name: String,
    pub creator: String,
    pub model_file_name: String,
    pub model_bytes: Vec<u8>,
    pub class_file: Vec<u8>,
}

/// What happened to one image of a batch.
#[derive(Debug)]
pub enum UploadOutcome {
    /// Stored with its processed image and detections.
    Processed {
        image: UploadedImage,
        warnings: Vec<ClassIdOutOfRange>,
    },
    /// Stored, but processing failed; the image can be retried later.
    Pending {
        image_id: i64,
        file_name: String,
        error: Error,
    },
    /// Failed validation and was not stored.
    Rejected {
        file_name: String,
        errors: ValidationErrors,
    },
}

impl UploadOutcome {
    pub fn file_name(&self) -> &str {
        match self {
            UploadOutcome::Processed { image, .. } => &image.file_name,
            UploadOutcome::Pending { file_name, .. } | UploadOutcome::Rejected { file_name, .. } => {
                file_name
            }
        }
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, UploadOutcome::Processed { .. })
    }
}

struct ProcessedImage {
    png: Vec<u8>,
    detections: Vec<Detection>,
    warnings: Vec<ClassIdOutOfRange>,
}

/// An image whose pixels are being decoded on the worker pool.
struct Decode {
    file_name: String,
    bytes: Arc<Vec<u8>>,
    handle: JoinHandle<Result<DynamicImage, ValidationErrors>>,
}

struct Decoded {
    file_name: String,
    bytes: Vec<u8>,
    image: Result<DynamicImage, ValidationErrors>,
}

impl Decode {
    async fn wait(self) -> Decoded {
        let image = self.handle.await.unwrap_or_else(|e| {
            Err(ValidationError::UndecodableImage {
                reason: format!("decoder failed: {e}"),
            }
            .into())
        });
        // The worker's clone is gone once the task has finished.
        let bytes = Arc::try_unwrap(self.bytes).unwrap_or_else(|shared| shared.as_ref().clone());
        Decoded {
            file_name: self.file_name,
            bytes,
            image,
        }
    }
}

/// A stored, still pending image whose processing has been handed to the worker pool.
struct Job {
    image_id: i64,
    file_name: String,
    handle: JoinHandle<Result<ProcessedImage>>,
}

/// Upload → validate → infer → render → persist.
pub struct Workbench<S, L: ModelLoader> {
    store: S,
    loader: L,
    renderer: Arc<Renderer>,
    workers: Arc<Semaphore>,
    max_batch_images: usize,
}

impl<S, L> Workbench<S, L>
where
    S: ProjectRepository + ImageRepository,
    L: ModelLoader,
{
    pub fn new(store: S, loader: L, config: &Config) -> Self {
        Self {
            store,
            loader,
            renderer: Arc::new(Renderer::default()),
            workers: Arc::new(Semaphore::new(config.max_parallel_inference.max(1))),
            max_batch_images: config.max_batch_images,
        }
    }

    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = Arc::new(renderer);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate every input, check the model loads, then persist the project.
    ///
    /// Validation problems across name, creator, model and class file are
    /// returned together. A model that fails to load aborts creation.
    pub async fn create_project(&self, request: CreateProject) -> Result<Project> {
        let mut errors = Vec::new();
        let meta = validate_project_meta(&request.name, &request.creator)
            .map_err(|e| errors.extend(e))
            .ok();
        let model = validate_model_file(&request.model_file_name, request.model_bytes)
            .map_err(|e| errors.extend(e))
            .ok();
        let classes = validate_class_file(&request.class_file)
            .map_err(|e| errors.extend(e))
            .ok();

        let (Some(meta), Some(model), Some(classes)) = (meta, model, classes) else {
            return Err(ValidationErrors(errors).into());
        };

        self.loader.load(&model.bytes)?;
        let palette = ClassPalette::resolve(&classes);
        tracing::debug!(
            classes = palette.len(),
            explicit = palette.explicit_count(),
            "class palette resolved"
        );

        self.store
            .create_project(NewProject {
                meta,
                model,
                palette,
                class_file: String::from_utf8_lossy(&request.class_file).into_owned(),
            })
            .await
    }

    pub async fn get_project(&self, id: i64) -> Result<Project> {
        self.store.get_project(id).await
    }

    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        self.store.list_projects().await
    }

    pub async fn delete_project(&self, id: i64) -> Result<()> {
        self.store.delete_project(id).await
    }

    pub async fn get_image(&self, id: i64) -> Result<UploadedImage> {
        self.store.get_image(id).await
    }

    pub async fn list_images(&self, project_id: i64) -> Result<Vec<ImageSummary>> {
        self.store.list_images(project_id).await
    }

    pub async fn delete_image(&self, id: i64) -> Result<()> {
        self.store.delete_image(id).await
    }

    pub async fn delete_images(&self, ids: &[i64]) -> Result<u64> {
        self.store.delete_images(ids).await
    }

    async fn load_model(&self, project_id: i64) -> Result<Arc<L::Model>> {
        let artifact = self.store.get_model_artifact(project_id).await?;
        let model = self.loader.load(&artifact.bytes)?;
        tracing::debug!(project_id, model = %artifact.reference, "model loaded");
        Ok(Arc::new(model))
    }

    /// Upload a batch of `(file_name, bytes)` into a project.
    ///
    /// Returns one outcome per input, in input order. A rejected or failed
    /// image never affects its siblings; a missing project, a model that
    /// does not load, or a store failure aborts the whole call.
    pub async fn upload_images(
        &self,
        project_id: i64,
        files: Vec<(String, Vec<u8>)>,
    ) -> Result<Vec<UploadOutcome>> {
        if files.len() > self.max_batch_images {
            return Err(Error::BatchTooLarge {
                count: files.len(),
                max: self.max_batch_images,
            });
        }

        let project = self.store.get_project(project_id).await?;
        let model = self.load_model(project_id).await?;
        let palette = Arc::new(project.palette);
        tracing::info!(project_id, images = files.len(), "processing upload");

        // Header checks run here; pixels are decoded on the worker pool.
        let mut decodes = Vec::with_capacity(files.len());
        for (file_name, bytes) in files {
            decodes.push(match inspect_image(&file_name, &bytes) {
                Ok(header) => Ok(self.spawn_decode(header, bytes).await?),
                Err(errors) => Err(rejected(file_name, errors)),
            });
        }

        let mut slots = Vec::with_capacity(decodes.len());
        for decode in decodes {
            let decoded = match decode {
                Ok(decode) => decode.wait().await,
                Err(outcome) => {
                    slots.push(Err(outcome));
                    continue;
                }
            };
            let image = match decoded.image {
                Ok(image) => image,
                Err(errors) => {
                    slots.push(Err(rejected(decoded.file_name, errors)));
                    continue;
                }
            };

            let stored = self
                .store
                .add_image(NewImage {
                    project_id,
                    file_name: decoded.file_name,
                    original_bytes: decoded.bytes,
                })
                .await?;
            let job = self
                .spawn_job(stored.id, stored.file_name, image, &model, &palette)
                .await?;
            slots.push(Ok(job));
        }

        self.finish_jobs(slots).await
    }

    /// Reprocess every pending image of a project, oldest first.
    pub async fn retry_pending(&self, project_id: i64) -> Result<Vec<UploadOutcome>> {
        let project = self.store.get_project(project_id).await?;
        let pending_ids = self.store.list_pending_images(project_id).await?;
        if pending_ids.is_empty() {
            return Ok(Vec::new());
        }

        let model = self.load_model(project_id).await?;
        let palette = Arc::new(project.palette);
        tracing::info!(project_id, images = pending_ids.len(), "retrying pending images");

        let mut outcomes = Vec::with_capacity(pending_ids.len());
        for chunk in pending_ids.chunks(self.max_batch_images.max(1)) {
            // Stored originals passed validation once; check and decode them the same way again.
            let mut decodes = Vec::with_capacity(chunk.len());
            for &id in chunk {
                let stored = self.store.get_image(id).await?;
                let decode = match inspect_image(&stored.file_name, &stored.original_bytes) {
                    Ok(header) => Ok(self.spawn_decode(header, stored.original_bytes).await?),
                    Err(errors) => Err(pending(id, stored.file_name, errors.into())),
                };
                decodes.push((id, decode));
            }

            let mut slots = Vec::with_capacity(decodes.len());
            for (id, decode) in decodes {
                let decoded = match decode {
                    Ok(decode) => decode.wait().await,
                    Err(outcome) => {
                        slots.push(Err(outcome));
                        continue;
                    }
                };
                slots.push(match decoded.image {
                    Ok(image) => Ok(self
                        .spawn_job(id, decoded.file_name, image, &model, &palette)
                        .await?),
                    Err(errors) => Err(pending(id, decoded.file_name, errors.into())),
                });
            }
            outcomes.extend(self.finish_jobs(slots).await?);
        }
        Ok(outcomes)
    }

    async fn spawn_decode(&self, header: ImageHeader, bytes: Vec<u8>) -> Result<Decode> {
        let permit = self.workers.clone().acquire_owned().await?;
        let file_name = header.file_name.clone();
        let bytes = Arc::new(bytes);
        let shared = Arc::clone(&bytes);

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            header.decode(&shared).map(|validated| validated.image)
        });
        Ok(Decode {
            file_name,
            bytes,
            handle,
        })
    }

    async fn spawn_job(
        &self,
        image_id: i64,
        file_name: String,
        image: DynamicImage,
        model: &Arc<L::Model>,
        palette: &Arc<ClassPalette>,
    ) -> Result<Job> {
        let permit = self.workers.clone().acquire_owned().await?;
        let model = Arc::clone(model);
        let palette = Arc::clone(palette);
        let renderer = Arc::clone(&self.renderer);

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            process_image(&*model, &renderer, &palette, &image)
        });
        Ok(Job {
            image_id,
            file_name,
            handle,
        })
    }

    /// Wait for every job in order; slots without a job already hold their outcome.
    async fn finish_jobs(
        &self,
        slots: Vec<Result<Job, UploadOutcome>>,
    ) -> Result<Vec<UploadOutcome>> {
        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            outcomes.push(match slot {
                Ok(job) => self.finish_job(job).await?,
                Err(outcome) => outcome,
            });
        }
        Ok(outcomes)
    }

    async fn finish_job(&self, job: Job) -> Result<UploadOutcome> {
        let processed = match job.handle.await {
            Ok(Ok(processed)) => processed,
            Ok(Err(error)) => return Ok(pending(job.image_id, job.file_name, error)),
            Err(join_error) => return Ok(pending(job.image_id, job.file_name, join_error.into())),
        };

        let image = self
            .store
            .complete_image(job.image_id, processed.png, &processed.detections)
            .await?;
        tracing::info!(
            image_id = image.id,
            file = %image.file_name,
            detections = image.detections.len(),
            "image processed"
        );
        Ok(UploadOutcome::Processed {
            image,
            warnings: processed.warnings,
        })
    }
}

fn rejected(file_name: String, errors: ValidationErrors) -> UploadOutcome {
    tracing::warn!(file = %file_name, %errors, "image rejected");
    UploadOutcome::Rejected { file_name, errors }
}

fn pending(image_id: i64, file_name: String, error: Error) -> UploadOutcome {
    tracing::warn!(image_id, file = %file_name, %error, "processing failed; image left pending");
    UploadOutcome::Pending {
        image_id,
        file_name,
        error,
    }
}

fn process_image(
    model: &dyn Detector,
    renderer: &Renderer,
    palette: &ClassPalette,
    image: &DynamicImage,
) -> Result<ProcessedImage> {
    let raw = model.infer(image)?;
    let detections = sanitize_detections(raw, image.width(), image.height());
    let rendered = renderer.render(image, &detections, palette);

    let mut png = Vec::new();
    rendered
        .image
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(ProcessedImage {
        png,
        detections,
        warnings: rendered.warnings,
    })
}
