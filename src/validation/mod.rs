//! Checks applied to every upload before it reaches the store. Apart from
//! `files`, which reads from disk, they are pure.

pub mod class_file;
pub mod files;
pub mod image;
pub mod model;

pub use class_file::{ClassLine, MAX_CLASSES, MAX_CLASS_NAME_LEN, parse_class_line, validate_class_file};
pub use files::{
    DirectoryReport, FileCheck, FileReport, validate_directory, validate_image_file,
};
pub use self::image::{
    ImageHeader, ImageKind, MAX_IMAGE_BYTES, MAX_IMAGE_DIMENSION, ValidatedImage, inspect_image,
    validate_image,
};
pub use model::{ModelUpload, ProjectMeta, validate_model_file, validate_project_meta};

use crate::error::ValidationError;

const MAX_FILE_NAME_LEN: usize = 255;
const RESERVED_CHARS: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

/// Reject names that could escape a directory or confuse a filesystem.
pub fn check_file_name(name: &str) -> Result<(), ValidationError> {
    let unsafe_name = |reason| ValidationError::UnsafeFileName {
        name: name.to_string(),
        reason,
    };

    if name.trim().is_empty() {
        return Err(unsafe_name("file name is empty"));
    }
    if name.chars().count() > MAX_FILE_NAME_LEN {
        return Err(unsafe_name("file name is longer than 255 characters"));
    }
    if name.chars().any(char::is_control) {
        return Err(unsafe_name("file name contains control characters"));
    }
    if name.contains('/') || name.contains('\\') {
        return Err(unsafe_name("file name contains a path separator"));
    }
    // With separators ruled out, only the bare names refer to a directory.
    if name == "." || name == ".." {
        return Err(unsafe_name("file name is a directory reference"));
    }
    if name.chars().any(|c| RESERVED_CHARS.contains(&c)) {
        return Err(unsafe_name("file name contains a reserved character"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn rejects_traversal_and_control_characters() {
        for name in [
            "../../etc/passwd.jpg",
            "..\\boot.ini",
            "..",
            ".",
            "bad\u{0}.png",
            "tab\there.jpg",
            "what?.png",
            "",
            "   ",
        ] {
            let err = check_file_name(name).expect_err(name);
            assert_eq!(err.kind(), ErrorKind::UnsafeFileName, "{name}");
        }
    }

    #[test]
    fn accepts_ordinary_names() {
        for name in [
            "photo.jpg",
            "IMG 0001.PNG",
            "scan_2024-01-01.bmp",
            "a.b.jpeg",
            "photo..v2.png",
            "wait...jpg",
            "..hidden.png",
        ] {
            assert!(check_file_name(name).is_ok(), "{name}");
        }
    }
}
