//! Integration tests for the upload → detect → render → persist flow.
//!
//! Tests cover:
//! - Project creation with validation and model loading
//! - Batches with rejected images and failed inference
//! - Out-of-range class ids and retrying pending images

mod common;

use std::sync::atomic::Ordering;

use annolens::{Config, CreateProject, UploadOutcome, Workbench};
use image::ImageFormat;

use common::*;

fn test_config() -> Config {
    Config {
        max_batch_images: 4,
        max_parallel_inference: 2,
        ..Config::default()
    }
}

fn create_request(name: &str, classes: &str) -> CreateProject {
    CreateProject {
        name: name.to_string(),
        creator: "tester".to_string(),
        model_file_name: "model.rten".to_string(),
        model_bytes: b"weights".to_vec(),
        class_file: classes.as_bytes().to_vec(),
    }
}

#[tokio::test]
async fn test_create_project_resolves_palette() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;
    let workbench = Workbench::new(store, FakeLoader::default(), &test_config());

    let project = workbench
        .create_project(create_request("Survey", TEST_CLASSES))
        .await?;
    let names: Vec<&str> = project.palette.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["person", "car", "dog"]);

    let stored = workbench.get_project(project.id).await?;
    assert_eq!(stored.palette, project.palette);
    assert_eq!(workbench.list_projects().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_create_project_reports_all_validation_errors() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;
    let workbench = Workbench::new(store, FakeLoader::default(), &test_config());

    let mut request = create_request("   ", "dog\ncat:sparkly\ndog\n");
    request.model_file_name = "../model.rten".to_string();
    let err = workbench.create_project(request).await.unwrap_err();

    let kinds = err.kinds();
    assert!(kinds.contains(&ErrorKind::InvalidProjectField), "{kinds:?}");
    assert!(kinds.contains(&ErrorKind::UnsafeFileName), "{kinds:?}");
    assert!(kinds.contains(&ErrorKind::InvalidColor), "{kinds:?}");
    assert!(kinds.contains(&ErrorKind::DuplicateClassName), "{kinds:?}");

    // Nothing was stored
    assert!(workbench.list_projects().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_create_project_fails_when_model_does_not_load() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;
    let loader = FakeLoader {
        fail_load: true,
        ..FakeLoader::default()
    };
    let workbench = Workbench::new(store, loader, &test_config());

    let err = workbench
        .create_project(create_request("Broken", TEST_CLASSES))
        .await
        .unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::ModelLoadFailure]);
    assert!(workbench.list_projects().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_upload_batch_isolates_bad_images() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;
    let loader = FakeLoader::returning(vec![
        make_detection(0, 0.9, [5.0, 5.0, 30.0, 30.0]),
        make_detection(2, 0.6, [40.0, 10.0, 60.0, 50.0]),
    ]);
    let workbench = Workbench::new(store, loader, &test_config());
    let project = workbench
        .create_project(create_request("Batch", TEST_CLASSES))
        .await?;

    let outcomes = workbench
        .upload_images(
            project.id,
            vec![
                ("first.png".to_string(), png_bytes(64, 64)),
                ("../../etc/passwd.jpg".to_string(), png_bytes(64, 64)),
                ("notes.gif".to_string(), png_bytes(64, 64)),
                ("second.jpg".to_string(), image_bytes(64, 64, ImageFormat::Jpeg)),
            ],
        )
        .await?;

    assert_eq!(outcomes.len(), 4);
    let names: Vec<&str> = outcomes.iter().map(|o| o.file_name()).collect();
    assert_eq!(
        names,
        vec!["first.png", "../../etc/passwd.jpg", "notes.gif", "second.jpg"]
    );

    assert!(outcomes[0].is_processed());
    assert!(outcomes[3].is_processed());
    match &outcomes[1] {
        UploadOutcome::Rejected { errors, .. } => {
            assert!(errors.kinds().contains(&ErrorKind::UnsafeFileName))
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    match &outcomes[2] {
        UploadOutcome::Rejected { errors, .. } => {
            assert_eq!(errors.kinds(), vec![ErrorKind::InvalidImageType])
        }
        other => panic!("expected rejection, got {other:?}"),
    }

    let UploadOutcome::Processed { image, warnings } = &outcomes[0] else {
        panic!("expected processed image");
    };
    assert!(warnings.is_empty());
    assert_eq!(image.detections.len(), 2);
    let processed = image.processed_bytes.as_ref().expect("processed bytes");
    let decoded = image::load_from_memory_with_format(processed, ImageFormat::Png)?;
    assert_eq!((decoded.width(), decoded.height()), (64, 64));

    // Only the two valid images were stored
    assert_eq!(workbench.list_images(project.id).await?.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_image_failing_full_decode_is_rejected_on_the_worker_pool() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;
    let loader = FakeLoader::returning(vec![make_detection(0, 0.9, [1.0, 1.0, 6.0, 6.0])]);
    // One worker: decodes and inference share the single permit
    let config = Config {
        max_parallel_inference: 1,
        ..test_config()
    };
    let workbench = Workbench::new(store, loader, &config);
    let project = workbench
        .create_project(create_request("Truncated", TEST_CLASSES))
        .await?;

    // The header is intact, so only the full decode notices the damage
    let mut truncated = png_bytes(48, 48);
    truncated.truncate(truncated.len() - 20);

    let outcomes = workbench
        .upload_images(
            project.id,
            vec![
                ("a.png".to_string(), png_bytes(16, 16)),
                ("cut.png".to_string(), truncated),
                ("b.png".to_string(), png_bytes(16, 16)),
                ("c.bmp".to_string(), image_bytes(16, 16, ImageFormat::Bmp)),
            ],
        )
        .await?;

    assert!(outcomes[0].is_processed());
    match &outcomes[1] {
        UploadOutcome::Rejected { file_name, errors } => {
            assert_eq!(file_name, "cut.png");
            assert_eq!(errors.kinds(), vec![ErrorKind::UndecodableImage]);
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert!(outcomes[2].is_processed());
    assert!(outcomes[3].is_processed());

    let stored: Vec<String> = workbench
        .list_images(project.id)
        .await?
        .into_iter()
        .map(|i| i.file_name)
        .collect();
    assert_eq!(stored, vec!["c.bmp", "b.png", "a.png"]);

    Ok(())
}

#[tokio::test]
async fn test_inference_failure_leaves_image_pending() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;
    let loader = FakeLoader {
        detections: vec![make_detection(1, 0.8, [1.0, 1.0, 10.0, 10.0])],
        fail_width: Some(33),
        ..FakeLoader::default()
    };
    let workbench = Workbench::new(store, loader, &test_config());
    let project = workbench
        .create_project(create_request("Flaky", TEST_CLASSES))
        .await?;

    let outcomes = workbench
        .upload_images(
            project.id,
            vec![
                ("ok.png".to_string(), png_bytes(32, 32)),
                ("bad.png".to_string(), png_bytes(33, 33)),
            ],
        )
        .await?;

    assert!(outcomes[0].is_processed());
    let UploadOutcome::Pending { image_id, error, .. } = &outcomes[1] else {
        panic!("expected pending outcome, got {:?}", outcomes[1]);
    };
    assert_eq!(error.kinds(), vec![ErrorKind::InferenceFailure]);

    let stored = workbench.get_image(*image_id).await?;
    assert_eq!(stored.status(), ImageStatus::Pending);
    assert!(stored.detections.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_retry_pending_processes_failed_images() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;
    let loader = FakeLoader::returning(vec![make_detection(0, 0.7, [2.0, 2.0, 12.0, 12.0])]);
    let failing = loader.fail_inference.clone();
    let workbench = Workbench::new(store, loader, &test_config());
    let project = workbench
        .create_project(create_request("Retry", TEST_CLASSES))
        .await?;

    failing.store(true, Ordering::SeqCst);
    let outcomes = workbench
        .upload_images(
            project.id,
            vec![
                ("a.png".to_string(), png_bytes(16, 16)),
                ("b.png".to_string(), png_bytes(16, 16)),
            ],
        )
        .await?;
    assert!(outcomes.iter().all(|o| matches!(o, UploadOutcome::Pending { .. })));
    assert_eq!(workbench.list_projects().await?[0].pending_count, 2);

    failing.store(false, Ordering::SeqCst);
    let retried = workbench.retry_pending(project.id).await?;
    assert_eq!(retried.len(), 2);
    assert!(retried.iter().all(|o| o.is_processed()));

    assert_eq!(workbench.list_projects().await?[0].pending_count, 0);
    assert!(workbench.retry_pending(project.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_out_of_range_class_id_is_a_warning() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;
    let loader = FakeLoader::returning(vec![
        make_detection(0, 0.9, [2.0, 2.0, 20.0, 20.0]),
        make_detection(17, 0.8, [30.0, 30.0, 60.0, 60.0]),
    ]);
    let workbench = Workbench::new(store, loader, &test_config());
    let project = workbench
        .create_project(create_request("Unknown class", TEST_CLASSES))
        .await?;

    let outcomes = workbench
        .upload_images(project.id, vec![("a.png".to_string(), png_bytes(80, 80))])
        .await?;

    let UploadOutcome::Processed { image, warnings } = &outcomes[0] else {
        panic!("expected processed image, got {:?}", outcomes[0]);
    };
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].class_id, 17);
    assert_eq!(warnings[0].kind(), ErrorKind::ClassIdOutOfRange);
    // Both detections are kept
    assert_eq!(image.detections.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_detections_are_clamped_to_image() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;
    let loader = FakeLoader::returning(vec![
        make_detection(0, 1.4, [-10.0, -5.0, 500.0, 20.0]),
        make_detection(1, 0.5, [90.0, 90.0, 95.0, 95.0]),
    ]);
    let workbench = Workbench::new(store, loader, &test_config());
    let project = workbench
        .create_project(create_request("Clamp", TEST_CLASSES))
        .await?;

    let outcomes = workbench
        .upload_images(project.id, vec![("a.png".to_string(), png_bytes(40, 40))])
        .await?;
    let UploadOutcome::Processed { image, .. } = &outcomes[0] else {
        panic!("expected processed image, got {:?}", outcomes[0]);
    };

    // The second box lies entirely outside the image and is dropped
    assert_eq!(image.detections.len(), 1);
    let d = image.detections[0];
    assert_eq!(d.confidence, 1.0);
    assert_eq!(
        (d.bbox.x_min, d.bbox.y_min, d.bbox.x_max, d.bbox.y_max),
        (0.0, 0.0, 40.0, 20.0)
    );

    Ok(())
}

#[tokio::test]
async fn test_batch_too_large_is_rejected_up_front() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;
    let workbench = Workbench::new(store, FakeLoader::default(), &test_config());
    let project = workbench
        .create_project(create_request("Big", TEST_CLASSES))
        .await?;

    let files = (0..5)
        .map(|i| (format!("{i}.png"), png_bytes(8, 8)))
        .collect();
    let err = workbench.upload_images(project.id, files).await.unwrap_err();
    assert_eq!(err.kinds(), vec![ErrorKind::BatchTooLarge]);
    assert!(workbench.list_images(project.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_upload_to_missing_project_fails() {
    let (store, _temp_dir) = create_test_store().await;
    let workbench = Workbench::new(store, FakeLoader::default(), &test_config());

    let err = workbench
        .upload_images(7, vec![("a.png".to_string(), png_bytes(8, 8))])
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_delete_project_removes_images() -> anyhow::Result<()> {
    let (store, _temp_dir) = create_test_store().await;
    let workbench = Workbench::new(store, FakeLoader::default(), &test_config());
    let project = workbench
        .create_project(create_request("Gone", TEST_CLASSES))
        .await?;
    let outcomes = workbench
        .upload_images(project.id, vec![("a.png".to_string(), png_bytes(8, 8))])
        .await?;
    let UploadOutcome::Processed { image, .. } = &outcomes[0] else {
        panic!("expected processed image");
    };

    workbench.delete_project(project.id).await?;
    assert!(workbench.list_images(project.id).await?.is_empty());
    assert!(workbench.get_image(image.id).await.unwrap_err().is_not_found());

    Ok(())
}
