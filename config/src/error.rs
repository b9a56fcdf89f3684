use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Schema(#[from] schema::SchemaError),

    #[error("unknown drive interface \"{0}\"")]
    UnknownInterface(String),

    #[error("drive index {index} out of range for interface \"{interface}\" (max {max})")]
    IndexOutOfRange {
        interface: String,
        index: u32,
        max: u32,
    },

    #[error("cdrom drive \"{0}\" may not set {1}")]
    CdromExclusion(String, &'static str),

    #[error("throttling option \"{option}\" requires \"{requires}\" to be set")]
    ThrottlingRequirement {
        option: &'static str,
        requires: &'static str,
    },

    #[error("\"{a}\" and \"{b}\" are mutually exclusive")]
    MutuallyExclusive { a: &'static str, b: &'static str },

    #[error("size parse error: {0}")]
    Size(#[from] util::size::SizeError),

    #[error("the requested change conflicts with in-band lock \"{0}\"")]
    Conflict(String),

    #[error("volume \"{0}\" is still referenced by a snapshot")]
    VolumeInUse(String),

    #[error("malformed config file line: {0}")]
    MalformedLine(String),

    #[error("unknown snapshot \"{0}\"")]
    UnknownSnapshot(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
