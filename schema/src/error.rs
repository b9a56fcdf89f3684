use thiserror::Error;

/// All errors name the offending option, per the schema's error contract.
#[derive(Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("unknown format {0}")]
    UnknownFormat(String),
    #[error("unknown key \"{0}\" for format \"{1}\"")]
    UnknownKey(String, String),
    #[error("duplicate assignment for key \"{0}\"")]
    DuplicateAssignment(String),
    #[error("value for \"{0}\" contains a newline")]
    NewlineInValue(String),
    #[error("type mismatch for \"{key}\": expected {expected}, got \"{got}\"")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        got: String,
    },
    #[error("value \"{value}\" for \"{key}\" is not one of the allowed values {allowed:?}")]
    EnumViolation {
        key: String,
        value: String,
        allowed: Vec<String>,
    },
    #[error("value \"{value}\" for \"{key}\" does not match pattern {pattern}")]
    PatternMismatch {
        key: String,
        value: String,
        pattern: String,
    },
    #[error("value {value} for \"{key}\" is out of range [{min:?}, {max:?}]")]
    OutOfRange {
        key: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
    #[error("no default-key field is registered for format \"{0}\"")]
    NoDefaultKey(String),
    #[error("missing required key \"{0}\"")]
    MissingRequired(String),
    #[error("custom check failed for format \"{format}\": {message}")]
    CheckFailed { format: String, message: String },
}

pub type Result<T> = std::result::Result<T, SchemaError>;
