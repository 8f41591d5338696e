use shadowloader_classfile::ClassfileError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessorError {
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
    #[error("Failed to read compiled class #{index}")]
    Unreadable {
        index: usize,
        #[source]
        source: Box<ProcessorError>,
    },
    #[error("Failed to generate {creator}")]
    Generation {
        creator: String,
        #[source]
        source: Box<ProcessorError>,
    },
}

pub type Result<T> = std::result::Result<T, ProcessorError>;
