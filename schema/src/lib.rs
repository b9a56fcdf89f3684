//! Typed property-string schema: registered formats, enums, constraints,
//! aliases, default keys, round-trip parse/print. Every config option
//! string (drives, nets, numa nodes, and so on) is parsed and printed
//! through a `SchemaRegistry` built from `Format`/`FieldDescriptor` values.

pub mod error;
pub mod field;
pub mod format;
pub mod registry;

pub use error::{Result, SchemaError};
pub use field::{FieldDescriptor, FieldType, FieldValue};
pub use format::{Format, PropertyMap};
pub use registry::SchemaRegistry;
