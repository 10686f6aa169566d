use crate::error::{ValidationError, ValidationErrors};
use crate::validation::check_file_name;

const MAX_PROJECT_FIELD_LEN: usize = 100;

/// A model artifact accepted for loading. Whether the bytes really are a
/// model is decided by the model loader, not here.
#[derive(Debug, Clone)]
pub struct ModelUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

pub fn validate_model_file(file_name: &str, bytes: Vec<u8>) -> Result<ModelUpload, ValidationErrors> {
    check_file_name(file_name)?;
    if bytes.is_empty() {
        return Err(ValidationError::InvalidProjectField {
            field: "model file",
            reason: "file is empty",
        }
        .into());
    }
    Ok(ModelUpload {
        file_name: file_name.to_string(),
        bytes,
    })
}

/// Trimmed project name and creator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMeta {
    pub name: String,
    pub creator: String,
}

fn check_field(field: &'static str, value: &str) -> Result<String, ValidationError> {
    let invalid = |reason| ValidationError::InvalidProjectField { field, reason };
    let value = value.trim();
    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.chars().count() > MAX_PROJECT_FIELD_LEN {
        return Err(invalid("must be at most 100 characters"));
    }
    if value.chars().any(char::is_control) {
        return Err(invalid("must not contain control characters"));
    }
    Ok(value.to_string())
}

pub fn validate_project_meta(name: &str, creator: &str) -> Result<ProjectMeta, ValidationErrors> {
    match (check_field("project name", name), check_field("creator", creator)) {
        (Ok(name), Ok(creator)) => Ok(ProjectMeta { name, creator }),
        (name, creator) => Err(ValidationErrors(
            [name.err(), creator.err()].into_iter().flatten().collect(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn project_meta_is_trimmed() {
        let meta = validate_project_meta("  Street survey ", "ana").unwrap();
        assert_eq!(meta.name, "Street survey");
        assert_eq!(meta.creator, "ana");
    }

    #[test]
    fn both_fields_are_reported() {
        let err = validate_project_meta(" ", &"x".repeat(101)).unwrap_err();
        assert_eq!(
            err.kinds(),
            vec![ErrorKind::InvalidProjectField, ErrorKind::InvalidProjectField]
        );
    }

    #[test]
    fn model_file_accepts_any_bytes_under_a_safe_name() {
        assert!(validate_model_file("yolov8n.rten", vec![0, 1, 2]).is_ok());
        let err = validate_model_file("../model.pt", vec![1]).unwrap_err();
        assert_eq!(err.kinds(), vec![ErrorKind::UnsafeFileName]);
        assert!(validate_model_file("model.pt", Vec::new()).is_err());
    }
}
