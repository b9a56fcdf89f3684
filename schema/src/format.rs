use std::collections::BTreeMap;

use crate::field::{FieldDescriptor, FieldValue};

/// A parsed property-string, keyed by field name in the order fields were
/// inserted during parsing. Printing re-derives order from the format's
/// field list, not from this map, so the map itself can be a plain
/// BTreeMap for lookup convenience.
pub type PropertyMap = BTreeMap<String, FieldValue>;

/// A named set of field descriptors, e.g. "virtio-blk" or "scsi-hd".
#[derive(Debug, Clone)]
pub struct Format {
    pub name: &'static str,
    pub fields: Vec<FieldDescriptor>,
}

impl Format {
    pub fn new(name: &'static str, fields: Vec<FieldDescriptor>) -> Self {
        Format { name, fields }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Resolve either a canonical field name or a registered alias.
    pub fn resolve(&self, key: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|f| f.name == key || f.alias == Some(key))
    }

    pub fn default_key_field(&self) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.default_key)
    }
}
