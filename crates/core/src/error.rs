use shadowloader_classfile::ClassfileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransformError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("Class file error: {0}")]
    Classfile(#[from] ClassfileError),
    #[error("Class format error: {0}")]
    ClassFormat(#[from] ristretto_classfile::Error),
    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Cannot patch {class}: {reason}")]
    PatchStructural { class: String, reason: String },
}

impl TransformError {
    pub fn patch(class: impl Into<String>, reason: impl Into<String>) -> Self {
        TransformError::PatchStructural {
            class: class.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransformError>;
