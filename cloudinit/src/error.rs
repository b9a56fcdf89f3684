use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CloudinitError {
    #[error("unknown cloud-init format \"{0}\"")]
    UnknownFormat(String),

    #[error("generated image exceeds the 3 MiB budget: {0} bytes")]
    TooLarge(u64),

    #[error("failed to read custom snippet {path}: {source}")]
    Snippet {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("genisoimage failed with status {0}")]
    Genisoimage(std::process::ExitStatus),

    #[error("qemu-img dd failed with status {0}")]
    QemuImgDd(std::process::ExitStatus),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, CloudinitError>;
