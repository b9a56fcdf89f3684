use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OvfError {
    #[error("failed to read OVF file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed OVF XML: {0}")]
    Xml(#[from] roxmltree::Error),

    #[error("OVF envelope is missing required element {0}")]
    MissingElement(&'static str),

    #[error("OVF disk drive references unknown {kind} id \"{id}\"")]
    DanglingReference { kind: &'static str, id: String },

    #[error("unsupported controller ResourceType {0} (expected ide=5, scsi=6, sata=20)")]
    UnsupportedController(u32),

    #[error("resolved disk path {0} escapes the OVF directory")]
    PathEscape(PathBuf),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OvfError>;
