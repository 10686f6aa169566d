use std::future::Future;

use crate::core::db::model::{ModelArtifact, NewProject, Project, ProjectSummary};
use crate::error::Result;

/// Projects, their palettes and model artifacts.
pub trait ProjectRepository {
    /// Persist project, palette and model artifact in one transaction.
    fn create_project(&self, project: NewProject) -> impl Future<Output = Result<Project>>;
    fn get_project(&self, id: i64) -> impl Future<Output = Result<Project>>;
    fn list_projects(&self) -> impl Future<Output = Result<Vec<ProjectSummary>>>;
    /// Irreversible; removes every image owned by the project.
    fn delete_project(&self, id: i64) -> impl Future<Output = Result<()>>;
    fn get_model_artifact(&self, project_id: i64) -> impl Future<Output = Result<ModelArtifact>>;
}
