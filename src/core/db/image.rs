use std::future::Future;

use crate::core::db::model::{ImageSummary, NewImage, UploadedImage};
use crate::detection::Detection;
use crate::error::Result;

/// Uploaded images and their detection results.
pub trait ImageRepository {
    /// Store the original upload as a pending record.
    fn add_image(&self, image: NewImage) -> impl Future<Output = Result<UploadedImage>>;

    /// Fill in the processed image and detections of a pending record.
    /// Repeating the call with identical content is a no-op; any other
    /// content for a completed image fails with `ImageAlreadyProcessed`.
    fn complete_image(
        &self,
        id: i64,
        processed_bytes: Vec<u8>,
        detections: &[Detection],
    ) -> impl Future<Output = Result<UploadedImage>>;

    fn get_image(&self, id: i64) -> impl Future<Output = Result<UploadedImage>>;
    fn list_images(&self, project_id: i64) -> impl Future<Output = Result<Vec<ImageSummary>>>;
    fn list_pending_images(&self, project_id: i64) -> impl Future<Output = Result<Vec<i64>>>;
    fn delete_image(&self, id: i64) -> impl Future<Output = Result<()>>;
    /// Delete several images at once; returns how many existed.
    fn delete_images(&self, ids: &[i64]) -> impl Future<Output = Result<u64>>;
}
