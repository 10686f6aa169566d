//! Image checks for files on disk, used by `annolens validate`.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::ValidationErrors;
use crate::validation::image::{ImageKind, validate_image};

#[derive(Debug)]
pub enum FileCheck {
    Passed {
        width: u32,
        height: u32,
        kind: ImageKind,
    },
    Invalid(ValidationErrors),
    /// The file (or a directory on the way to it) could not be read.
    Unreadable(io::Error),
}

#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub check: FileCheck,
}

impl FileReport {
    pub fn passed(&self) -> bool {
        matches!(self.check, FileCheck::Passed { .. })
    }
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.display();
        match &self.check {
            FileCheck::Passed {
                width,
                height,
                kind,
            } => write!(f, "PASS {path} ({width}x{height} {kind:?})"),
            FileCheck::Invalid(errors) => {
                write!(f, "FAIL {path}")?;
                for error in errors.iter() {
                    write!(f, "\n     {error}")?;
                }
                Ok(())
            }
            FileCheck::Unreadable(err) => write!(f, "FAIL {path}\n     {err}"),
        }
    }
}

/// Results for every image below a directory, sorted by path.
#[derive(Debug, Default)]
pub struct DirectoryReport {
    pub files: Vec<FileReport>,
}

impl DirectoryReport {
    pub fn checked(&self) -> usize {
        self.files.len()
    }

    pub fn failed(&self) -> usize {
        self.files.iter().filter(|r| !r.passed()).count()
    }
}

/// Read and validate one image file. Read errors are part of the report.
pub fn validate_image_file(path: &Path) -> FileReport {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let check = match fs::read(path) {
        Ok(bytes) => match validate_image(&file_name, &bytes) {
            Ok(image) => FileCheck::Passed {
                width: image.width,
                height: image.height,
                kind: image.kind,
            },
            Err(errors) => FileCheck::Invalid(errors),
        },
        Err(err) => FileCheck::Unreadable(err),
    };
    FileReport {
        path: path.to_path_buf(),
        check,
    }
}

/// Validate every file with a supported image extension below `dir`.
///
/// Symbolic links to directories are not followed. An unreadable entry or
/// sub-directory becomes a failed item; only an unreadable `dir` is an error.
pub fn validate_directory(dir: &Path) -> io::Result<DirectoryReport> {
    let mut candidates = Vec::new();
    let mut report = DirectoryReport::default();

    let root = fs::read_dir(dir)?;
    walk(dir, root, &mut candidates, &mut report.files);

    report
        .files
        .extend(candidates.iter().map(|path| validate_image_file(path)));
    report.files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(report)
}

fn walk(
    dir: &Path,
    entries: fs::ReadDir,
    candidates: &mut Vec<PathBuf>,
    failures: &mut Vec<FileReport>,
) {
    let unreadable = |path: &Path, err| FileReport {
        path: path.to_path_buf(),
        check: FileCheck::Unreadable(err),
    };

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                failures.push(unreadable(dir, err));
                continue;
            }
        };
        let path = entry.path();
        // Does not follow symlinks
        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(err) => {
                failures.push(unreadable(&path, err));
                continue;
            }
        };

        if file_type.is_dir() {
            match fs::read_dir(&path) {
                Ok(sub) => walk(&path, sub, candidates, failures),
                Err(err) => failures.push(unreadable(&path, err)),
            }
        } else if ImageKind::is_supported_path(&path) {
            candidates.push(path);
        } else if file_type.is_symlink() {
            tracing::debug!(path = %path.display(), "skipping symlink");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, ValidationError};

    #[test]
    fn report_lines() {
        let passed = FileReport {
            path: PathBuf::from("a/b.png"),
            check: FileCheck::Passed {
                width: 3,
                height: 2,
                kind: ImageKind::Png,
            },
        };
        assert_eq!(passed.to_string(), "PASS a/b.png (3x2 Png)");

        let invalid = FileReport {
            path: PathBuf::from("c.gif"),
            check: FileCheck::Invalid(
                ValidationError::InvalidImageType {
                    extension: "gif".into(),
                }
                .into(),
            ),
        };
        let text = invalid.to_string();
        assert!(text.starts_with("FAIL c.gif\n     "), "{text}");
        assert!(!invalid.passed());

        let report = DirectoryReport {
            files: vec![passed, invalid],
        };
        assert_eq!((report.checked(), report.failed()), (2, 1));
        let FileCheck::Invalid(errors) = &report.files[1].check else {
            panic!("expected invalid");
        };
        assert_eq!(errors.kinds(), vec![ErrorKind::InvalidImageType]);
    }
}
