use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandBuilderError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Pci(#[from] pci_topology::PciError),

    #[error("unknown cpu type: {0}")]
    UnknownCpuType(String),

    #[error("efidisk0 is missing; OVMF firmware requires it")]
    MissingEfidisk,

    #[error("numa mapping failed: {0}")]
    NumaMapping(String),
}

pub type Result<T> = std::result::Result<T, CommandBuilderError>;
