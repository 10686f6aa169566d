use std::fmt;

use thiserror::Error;

use crate::detection::DetectionError;

/// A single reason an upload was rejected by a validator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("line {line}: invalid class name {name:?}: {reason}")]
    InvalidClassName {
        line: usize,
        name: String,
        reason: &'static str,
    },

    #[error("line {line}: invalid color {token:?} (valid colors: {valid})", valid = crate::palette::NamedColor::token_list())]
    InvalidColor { line: usize, token: String },

    #[error("line {line}: duplicate class name {name:?} (first defined on line {first_line})")]
    DuplicateClassName {
        line: usize,
        first_line: usize,
        name: String,
    },

    #[error("too many classes: {count} (maximum is {max})")]
    TooManyClasses { count: usize, max: usize },

    #[error("no class entries found in file")]
    EmptyClassFile,

    #[error("file is not valid UTF-8 (at byte {offset})")]
    InvalidEncoding { offset: usize },

    #[error("invalid image type {extension:?} (valid types: jpg, jpeg, png, bmp)")]
    InvalidImageType { extension: String },

    #[error("image is {size} bytes (maximum is {max})")]
    ImageTooLarge { size: u64, max: u64 },

    #[error("image is {width}x{height} (maximum is {max}x{max})")]
    ImageDimensionsExceeded { width: u32, height: u32, max: u32 },

    #[error("unsafe file name {name:?}: {reason}")]
    UnsafeFileName { name: String, reason: &'static str },

    #[error("could not decode image: {reason}")]
    UndecodableImage { reason: String },

    #[error("invalid {field}: {reason}")]
    InvalidProjectField {
        field: &'static str,
        reason: &'static str,
    },
}

/// All problems found in one item, in the order they were found.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(pub Vec<ValidationError>);

impl ValidationErrors {
    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn kinds(&self) -> Vec<ErrorKind> {
        self.0.iter().map(ValidationError::kind).collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", messages.join("; "))
    }
}

impl std::error::Error for ValidationErrors {}

impl From<ValidationError> for ValidationErrors {
    fn from(err: ValidationError) -> Self {
        Self(vec![err])
    }
}

impl IntoIterator for ValidationErrors {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Flat classification of every failure the crate reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidClassName,
    InvalidColor,
    DuplicateClassName,
    TooManyClasses,
    EmptyClassFile,
    InvalidEncoding,
    InvalidImageType,
    ImageTooLarge,
    ImageDimensionsExceeded,
    UnsafeFileName,
    UndecodableImage,
    InvalidProjectField,
    ModelLoadFailure,
    InferenceFailure,
    ClassIdOutOfRange,
    StoreTransactionFailure,
    StoreUnavailable,
    NotFound,
    ImageAlreadyProcessed,
    BatchTooLarge,
}

impl ValidationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidClassName { .. } => ErrorKind::InvalidClassName,
            Self::InvalidColor { .. } => ErrorKind::InvalidColor,
            Self::DuplicateClassName { .. } => ErrorKind::DuplicateClassName,
            Self::TooManyClasses { .. } => ErrorKind::TooManyClasses,
            Self::EmptyClassFile => ErrorKind::EmptyClassFile,
            Self::InvalidEncoding { .. } => ErrorKind::InvalidEncoding,
            Self::InvalidImageType { .. } => ErrorKind::InvalidImageType,
            Self::ImageTooLarge { .. } => ErrorKind::ImageTooLarge,
            Self::ImageDimensionsExceeded { .. } => ErrorKind::ImageDimensionsExceeded,
            Self::UnsafeFileName { .. } => ErrorKind::UnsafeFileName,
            Self::UndecodableImage { .. } => ErrorKind::UndecodableImage,
            Self::InvalidProjectField { .. } => ErrorKind::InvalidProjectField,
        }
    }
}

/// Top-level error for store and workbench operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Detection(#[from] DetectionError),

    #[error("store transaction failed: {0}")]
    Store(#[from] sqlx::Error),

    #[error("store migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("database directory does not exist: {}", .dir.display())]
    MissingDirectory { dir: std::path::PathBuf },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("image {id} has already been processed with different content")]
    ImageAlreadyProcessed { id: i64 },

    #[error("batch of {count} images exceeds the limit of {max}")]
    BatchTooLarge { count: usize, max: usize },

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("failed to encode processed image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("worker task failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("inference workers are shut down")]
    WorkersClosed(#[from] tokio::sync::AcquireError),
}

impl Error {
    /// Kinds of every failure wrapped by this error; validation errors report one per reason.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self {
            Self::Validation(errors) => errors.kinds(),
            Self::Detection(err) => vec![err.kind()],
            Self::Store(_) | Self::Migration(_) | Self::Corrupt(_) => {
                vec![ErrorKind::StoreTransactionFailure]
            }
            Self::MissingDirectory { .. } => vec![ErrorKind::StoreUnavailable],
            Self::NotFound { .. } => vec![ErrorKind::NotFound],
            Self::ImageAlreadyProcessed { .. } => vec![ErrorKind::ImageAlreadyProcessed],
            Self::BatchTooLarge { .. } => vec![ErrorKind::BatchTooLarge],
            Self::Encode(_) | Self::Worker(_) | Self::WorkersClosed(_) => vec![ErrorKind::InferenceFailure],
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
