mod image;
mod model;
mod project;
mod state;
mod util;

use std::path::Path;
use std::sync::Arc;

use sqlx::{FromRow, SqliteConnection};
use state::StoreState;
use uuid::Uuid;

pub use self::image::ImageRepository;
pub use model::{
    ImageStatus, ImageSummary, ModelArtifact, NewImage, NewProject, Project, ProjectSummary,
    UploadedImage,
};
pub use project::ProjectRepository;

use crate::detection::{BoundingBox, Detection};
use crate::error::{Error, Result};
use crate::palette::{ClassColorEntry, ClassPalette, NamedColor};
use util::{format_timestamp, now, parse_timestamp};

/// Handle to the SQLite store. Cheap to clone; every clone shares one pool.
#[derive(Debug, Clone)]
pub struct Store {
    state: Arc<StoreState>,
}

impl Store {
    /// Open (or create) the database file and apply pending migrations.
    pub async fn open<P: AsRef<Path>>(db_file: P) -> Result<Self> {
        Ok(Self {
            state: Arc::new(StoreState::open(db_file).await?),
        })
    }

    /// Flush and close all connections. Operations after this fail.
    pub async fn close(&self) -> Result<()> {
        self.state.close().await
    }
}

#[derive(FromRow)]
struct ProjectRecord {
    id: i64,
    name: String,
    creator: String,
    model_ref: String,
    model_file_name: String,
    class_file: String,
    created_at: String,
}

#[derive(FromRow)]
struct PaletteRecord {
    name: String,
    color: String,
    explicit: i64,
}

#[derive(FromRow)]
struct ProjectSummaryRecord {
    id: i64,
    name: String,
    creator: String,
    created_at: String,
    class_count: i64,
    image_count: i64,
    pending_count: i64,
}

#[derive(FromRow)]
struct ImageRecord {
    id: i64,
    project_id: i64,
    file_name: String,
    original_bytes: Vec<u8>,
    processed_bytes: Option<Vec<u8>>,
    uploaded_at: String,
    processed_at: Option<String>,
}

#[derive(FromRow)]
struct ImageSummaryRecord {
    id: i64,
    project_id: i64,
    file_name: String,
    processed: i64,
    detection_count: i64,
    uploaded_at: String,
}

#[derive(FromRow)]
struct DetectionRecord {
    class_id: i64,
    confidence: f64,
    x_min: f64,
    y_min: f64,
    x_max: f64,
    y_max: f64,
}

fn parse_model_ref(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| Error::Corrupt(format!("bad model reference {value:?}: {e}")))
}

impl TryFrom<DetectionRecord> for Detection {
    type Error = Error;

    fn try_from(record: DetectionRecord) -> Result<Self> {
        let class_id = usize::try_from(record.class_id)
            .map_err(|_| Error::Corrupt(format!("negative class id {}", record.class_id)))?;
        Ok(Detection {
            class_id,
            confidence: record.confidence as f32,
            bbox: BoundingBox {
                x_min: record.x_min as f32,
                y_min: record.y_min as f32,
                x_max: record.x_max as f32,
                y_max: record.y_max as f32,
            },
        })
    }
}

async fn load_palette(conn: &mut SqliteConnection, project_id: i64) -> Result<ClassPalette> {
    let entries = sqlx::query_as::<_, PaletteRecord>(
        r#"SELECT name, color, explicit FROM palette_entry
        WHERE project_id = $1
        ORDER BY position ASC"#,
    )
    .bind(project_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(|record| {
        let color = record
            .color
            .parse::<NamedColor>()
            .map_err(|e| Error::Corrupt(e.to_string()))?;
        Ok(ClassColorEntry {
            name: record.name,
            color,
            explicit: record.explicit != 0,
        })
    })
    .collect::<Result<Vec<_>>>()?;
    Ok(ClassPalette::from_entries(entries))
}

async fn load_detections(conn: &mut SqliteConnection, image_id: i64) -> Result<Vec<Detection>> {
    sqlx::query_as::<_, DetectionRecord>(
        r#"SELECT class_id, confidence, x_min, y_min, x_max, y_max FROM detection
        WHERE image_id = $1
        ORDER BY position ASC"#,
    )
    .bind(image_id)
    .fetch_all(&mut *conn)
    .await?
    .into_iter()
    .map(Detection::try_from)
    .collect()
}

/// Reads the image row and its detections. Callers run this inside a
/// transaction so both reads come from the same snapshot.
async fn load_image(conn: &mut SqliteConnection, id: i64) -> Result<UploadedImage> {
    let record = sqlx::query_as::<_, ImageRecord>(
        r#"SELECT id, project_id, file_name, original_bytes, processed_bytes, uploaded_at, processed_at
        FROM image WHERE id = $1"#,
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(Error::NotFound { entity: "image", id })?;

    let detections = load_detections(conn, id).await?;
    Ok(UploadedImage {
        id: record.id,
        project_id: record.project_id,
        file_name: record.file_name,
        original_bytes: record.original_bytes,
        processed_bytes: record.processed_bytes,
        detections,
        uploaded_at: parse_timestamp(&record.uploaded_at)?,
        processed_at: record.processed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

impl ProjectRepository for Store {
    async fn create_project(&self, project: NewProject) -> Result<Project> {
        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin_transaction().await?;

        let model_reference = Uuid::new_v4();
        let created_at = now();
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO project (name, creator, model_ref, model_file_name, class_file, created_at)
            VALUES ($1, $2, $3, $4, $5, $6) RETURNING id"#,
        )
        .bind(&project.meta.name)
        .bind(&project.meta.creator)
        .bind(model_reference.to_string())
        .bind(&project.model.file_name)
        .bind(&project.class_file)
        .bind(format_timestamp(created_at)?)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(r#"INSERT INTO model_artifact (project_id, bytes) VALUES ($1, $2)"#)
            .bind(id)
            .bind(&project.model.bytes)
            .execute(&mut *tx)
            .await?;

        for (position, entry) in project.palette.entries().iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO palette_entry (project_id, position, name, color, explicit)
                VALUES ($1, $2, $3, $4, $5)"#,
            )
            .bind(id)
            .bind(position as i64)
            .bind(&entry.name)
            .bind(entry.color.token())
            .bind(entry.explicit)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(project_id = id, name = %project.meta.name, classes = project.palette.len(), "project created");

        Ok(Project {
            id,
            name: project.meta.name,
            creator: project.meta.creator,
            model_reference,
            model_file_name: project.model.file_name,
            palette: project.palette,
            class_file: project.class_file,
            created_at,
        })
    }

    async fn get_project(&self, id: i64) -> Result<Project> {
        let mut conn = self.state.conn().await?;
        // Record and palette are read from one snapshot.
        let mut tx = conn.begin_transaction().await?;
        let record = sqlx::query_as::<_, ProjectRecord>(
            r#"SELECT id, name, creator, model_ref, model_file_name, class_file, created_at
            FROM project WHERE id = $1"#,
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::NotFound {
            entity: "project",
            id,
        })?;

        let palette = load_palette(&mut tx, id).await?;
        tx.commit().await?;
        Ok(Project {
            id: record.id,
            name: record.name,
            creator: record.creator,
            model_reference: parse_model_ref(&record.model_ref)?,
            model_file_name: record.model_file_name,
            palette,
            class_file: record.class_file,
            created_at: parse_timestamp(&record.created_at)?,
        })
    }

    async fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let mut conn = self.state.conn().await?;
        sqlx::query_as::<_, ProjectSummaryRecord>(
            r#"SELECT
                p.id, p.name, p.creator, p.created_at,
                (SELECT COUNT(*) FROM palette_entry e WHERE e.project_id = p.id) AS class_count,
                (SELECT COUNT(*) FROM image i WHERE i.project_id = p.id) AS image_count,
                (SELECT COUNT(*) FROM image i
                    WHERE i.project_id = p.id AND i.processed_bytes IS NULL) AS pending_count
            FROM project p
            ORDER BY p.id DESC"#,
        )
        .fetch_all(&mut **conn)
        .await?
        .into_iter()
        .map(|record| {
            Ok(ProjectSummary {
                id: record.id,
                name: record.name,
                creator: record.creator,
                class_count: record.class_count,
                image_count: record.image_count,
                pending_count: record.pending_count,
                created_at: parse_timestamp(&record.created_at)?,
            })
        })
        .collect()
    }

    async fn delete_project(&self, id: i64) -> Result<()> {
        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin_transaction().await?;
        let deleted = sqlx::query(r#"DELETE FROM project WHERE id = $1"#)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(Error::NotFound {
                entity: "project",
                id,
            });
        }
        tx.commit().await?;
        tracing::info!(project_id = id, "project deleted");
        Ok(())
    }

    async fn get_model_artifact(&self, project_id: i64) -> Result<ModelArtifact> {
        let mut conn = self.state.conn().await?;
        let (model_ref, file_name, bytes): (String, String, Vec<u8>) = sqlx::query_as(
            r#"SELECT p.model_ref, p.model_file_name, m.bytes
            FROM project p JOIN model_artifact m ON m.project_id = p.id
            WHERE p.id = $1"#,
        )
        .bind(project_id)
        .fetch_optional(&mut **conn)
        .await?
        .ok_or(Error::NotFound {
            entity: "project",
            id: project_id,
        })?;
        Ok(ModelArtifact {
            reference: parse_model_ref(&model_ref)?,
            file_name,
            bytes,
        })
    }
}

impl ImageRepository for Store {
    async fn add_image(&self, image: NewImage) -> Result<UploadedImage> {
        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin_transaction().await?;

        // Check and insert in one statement so the write lock is taken up front.
        let uploaded_at = now();
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO image (project_id, file_name, original_bytes, uploaded_at)
            SELECT $1, $2, $3, $4
            WHERE EXISTS (SELECT 1 FROM project WHERE id = $1)
            RETURNING id"#,
        )
        .bind(image.project_id)
        .bind(&image.file_name)
        .bind(&image.original_bytes)
        .bind(format_timestamp(uploaded_at)?)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(Error::NotFound {
            entity: "project",
            id: image.project_id,
        })?;
        tx.commit().await?;

        tracing::debug!(image_id = id, project_id = image.project_id, "image stored as pending");
        Ok(UploadedImage {
            id,
            project_id: image.project_id,
            file_name: image.file_name,
            original_bytes: image.original_bytes,
            processed_bytes: None,
            detections: Vec::new(),
            uploaded_at,
            processed_at: None,
        })
    }

    async fn complete_image(
        &self,
        id: i64,
        processed_bytes: Vec<u8>,
        detections: &[Detection],
    ) -> Result<UploadedImage> {
        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin_transaction().await?;

        // The conditional update takes the write lock first, so two
        // completions of the same image cannot both succeed.
        let updated = sqlx::query(
            r#"UPDATE image SET processed_bytes = $1, processed_at = $2
            WHERE id = $3 AND processed_bytes IS NULL"#,
        )
        .bind(&processed_bytes)
        .bind(format_timestamp(now())?)
        .bind(id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let existing = load_image(&mut tx, id).await?;
            let same = existing.processed_bytes.as_deref() == Some(processed_bytes.as_slice())
                && existing.detections == detections;
            if !same {
                return Err(Error::ImageAlreadyProcessed { id });
            }
            return Ok(existing);
        }

        for (position, detection) in detections.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO detection (image_id, position, class_id, confidence, x_min, y_min, x_max, y_max)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
            )
            .bind(id)
            .bind(position as i64)
            .bind(detection.class_id as i64)
            .bind(detection.confidence as f64)
            .bind(detection.bbox.x_min as f64)
            .bind(detection.bbox.y_min as f64)
            .bind(detection.bbox.x_max as f64)
            .bind(detection.bbox.y_max as f64)
            .execute(&mut *tx)
            .await?;
        }

        let image = load_image(&mut tx, id).await?;
        tx.commit().await?;
        tracing::debug!(image_id = id, detections = detections.len(), "image completed");
        Ok(image)
    }

    async fn get_image(&self, id: i64) -> Result<UploadedImage> {
        let mut conn = self.state.conn().await?;
        // A concurrent completion must not be seen half applied.
        let mut tx = conn.begin_transaction().await?;
        let image = load_image(&mut tx, id).await?;
        tx.commit().await?;
        Ok(image)
    }

    async fn list_images(&self, project_id: i64) -> Result<Vec<ImageSummary>> {
        let mut conn = self.state.conn().await?;
        sqlx::query_as::<_, ImageSummaryRecord>(
            r#"SELECT
                i.id, i.project_id, i.file_name, i.uploaded_at,
                i.processed_bytes IS NOT NULL AS processed,
                (SELECT COUNT(*) FROM detection d WHERE d.image_id = i.id) AS detection_count
            FROM image i
            WHERE i.project_id = $1
            ORDER BY i.id DESC"#,
        )
        .bind(project_id)
        .fetch_all(&mut **conn)
        .await?
        .into_iter()
        .map(|record| {
            Ok(ImageSummary {
                id: record.id,
                project_id: record.project_id,
                file_name: record.file_name,
                status: if record.processed != 0 {
                    ImageStatus::Complete
                } else {
                    ImageStatus::Pending
                },
                detection_count: record.detection_count,
                uploaded_at: parse_timestamp(&record.uploaded_at)?,
            })
        })
        .collect()
    }

    async fn list_pending_images(&self, project_id: i64) -> Result<Vec<i64>> {
        let mut conn = self.state.conn().await?;
        Ok(sqlx::query_scalar(
            r#"SELECT id FROM image
            WHERE project_id = $1 AND processed_bytes IS NULL
            ORDER BY id ASC"#,
        )
        .bind(project_id)
        .fetch_all(&mut **conn)
        .await?)
    }

    async fn delete_image(&self, id: i64) -> Result<()> {
        let mut conn = self.state.conn().await?;
        let deleted = sqlx::query(r#"DELETE FROM image WHERE id = $1"#)
            .bind(id)
            .execute(&mut **conn)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(Error::NotFound { entity: "image", id });
        }
        Ok(())
    }

    async fn delete_images(&self, ids: &[i64]) -> Result<u64> {
        let mut conn = self.state.conn().await?;
        let mut tx = conn.begin_transaction().await?;
        let mut deleted = 0;
        for id in ids {
            deleted += sqlx::query(r#"DELETE FROM image WHERE id = $1"#)
                .bind(id)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }
        tx.commit().await?;
        tracing::info!(requested = ids.len(), deleted, "images deleted");
        Ok(deleted)
    }
}
