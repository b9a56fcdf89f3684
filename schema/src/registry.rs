use std::collections::HashMap;

use regex::Regex;

use crate::error::{Result, SchemaError};
use crate::field::{FieldType, FieldValue};
use crate::format::{Format, PropertyMap};

type Verifier = Box<dyn Fn(&PropertyMap) -> std::result::Result<(), String> + Send + Sync>;

/// Holds every registered format plus any custom per-format verifiers.
/// Round-trips property strings through `parse_property_string` /
/// `print_property_string`.
pub struct SchemaRegistry {
    formats: HashMap<&'static str, Format>,
    verifiers: HashMap<&'static str, Vec<Verifier>>,
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry {
            formats: HashMap::new(),
            verifiers: HashMap::new(),
        }
    }

    pub fn register(&mut self, format: Format) {
        self.formats.insert(format.name, format);
    }

    /// Register a custom verifier dispatched by `check_format`.
    pub fn register_verifier<F>(&mut self, format_name: &'static str, verifier: F)
    where
        F: Fn(&PropertyMap) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.verifiers
            .entry(format_name)
            .or_default()
            .push(Box::new(verifier));
    }

    pub fn format(&self, name: &str) -> Result<&Format> {
        self.formats
            .get(name)
            .ok_or_else(|| SchemaError::UnknownFormat(name.to_string()))
    }

    /// Split on commas; each item is `key=value` or an unkeyed value bound
    /// to the default-key field; aliases resolve; types are checked;
    /// unknown keys error.
    pub fn parse_property_string(&self, format_name: &str, text: &str) -> Result<PropertyMap> {
        let format = self.format(format_name)?;
        let mut map = PropertyMap::new();
        let mut seen_keys: Vec<String> = Vec::new();

        if text.contains('\n') {
            return Err(SchemaError::NewlineInValue(format_name.to_string()));
        }

        for item in text.split(',').filter(|s| !s.is_empty()) {
            let (key, raw_value) = match item.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => {
                    let default_field = format
                        .default_key_field()
                        .ok_or_else(|| SchemaError::NoDefaultKey(format_name.to_string()))?;
                    (default_field.name.to_string(), item.to_string())
                }
            };

            let descriptor = format
                .resolve(&key)
                .ok_or_else(|| SchemaError::UnknownKey(key.clone(), format_name.to_string()))?;

            let canonical = descriptor.name.to_string();
            if seen_keys.contains(&canonical) {
                return Err(SchemaError::DuplicateAssignment(canonical));
            }
            seen_keys.push(canonical.clone());

            let value = parse_typed_value(descriptor.field_type, &canonical, &raw_value)?;

            if let Some(allowed) = &descriptor.enum_values {
                let text_value = value.to_string();
                if !allowed.iter().any(|a| *a == text_value) {
                    return Err(SchemaError::EnumViolation {
                        key: canonical,
                        value: text_value,
                        allowed: allowed.iter().map(|s| s.to_string()).collect(),
                    });
                }
            }

            if let Some(pattern) = descriptor.pattern {
                let re = Regex::new(pattern)
                    .map_err(|_| SchemaError::PatternMismatch {
                        key: canonical.clone(),
                        value: raw_value.clone(),
                        pattern: pattern.to_string(),
                    })?;
                if !re.is_match(&raw_value) {
                    return Err(SchemaError::PatternMismatch {
                        key: canonical,
                        value: raw_value,
                        pattern: pattern.to_string(),
                    });
                }
            }

            if descriptor.min.is_some() || descriptor.max.is_some() {
                if let Some(n) = value.as_number() {
                    if let Some(min) = descriptor.min {
                        if n < min {
                            return Err(SchemaError::OutOfRange {
                                key: canonical,
                                value: n,
                                min: descriptor.min,
                                max: descriptor.max,
                            });
                        }
                    }
                    if let Some(max) = descriptor.max {
                        if n > max {
                            return Err(SchemaError::OutOfRange {
                                key: canonical,
                                value: n,
                                min: descriptor.min,
                                max: descriptor.max,
                            });
                        }
                    }
                }
            }

            map.insert(canonical, value);
        }

        for field in &format.fields {
            if !field.optional && !map.contains_key(field.name) {
                return Err(SchemaError::MissingRequired(field.name.to_string()));
            }
            if !map.contains_key(field.name) {
                if let Some(default) = &field.default {
                    map.insert(field.name.to_string(), default.clone());
                }
            }
        }

        Ok(map)
    }

    /// Prints fields in the format's declared order; the default-key field
    /// is emitted unkeyed when leading; alias fields are never printed
    /// (they only ever resolve on parse); keys in `skip_keys` are omitted.
    pub fn print_property_string(
        &self,
        format_name: &str,
        map: &PropertyMap,
        skip_keys: &[&str],
    ) -> Result<String> {
        let format = self.format(format_name)?;
        let mut parts = Vec::new();
        let mut first = true;

        for field in &format.fields {
            if skip_keys.contains(&field.name) {
                first = false;
                continue;
            }
            let Some(value) = map.get(field.name) else {
                first = false;
                continue;
            };

            if field.default_key && first {
                parts.push(value.to_string());
            } else {
                parts.push(format!("{}={}", field.name, value));
            }
            first = false;
        }

        Ok(parts.join(","))
    }

    /// Dispatch to every verifier registered against `format_name`.
    pub fn check_format(&self, format_name: &str, map: &PropertyMap) -> Result<()> {
        if let Some(verifiers) = self.verifiers.get(format_name) {
            for verifier in verifiers {
                verifier(map).map_err(|message| SchemaError::CheckFailed {
                    format: format_name.to_string(),
                    message,
                })?;
            }
        }
        Ok(())
    }
}

fn parse_typed_value(field_type: FieldType, key: &str, raw: &str) -> Result<FieldValue> {
    match field_type {
        FieldType::Bool => parse_bool(raw)
            .map(FieldValue::Bool)
            .ok_or_else(|| SchemaError::TypeMismatch {
                key: key.to_string(),
                expected: field_type.name(),
                got: raw.to_string(),
            }),
        FieldType::Integer => raw
            .parse::<i64>()
            .map(FieldValue::Integer)
            .map_err(|_| SchemaError::TypeMismatch {
                key: key.to_string(),
                expected: field_type.name(),
                got: raw.to_string(),
            }),
        FieldType::Number => raw
            .parse::<f64>()
            .map(FieldValue::Number)
            .map_err(|_| SchemaError::TypeMismatch {
                key: key.to_string(),
                expected: field_type.name(),
                got: raw.to_string(),
            }),
        FieldType::String => Ok(FieldValue::String(raw.to_string())),
    }
}

/// Accepts qemu/StratoVirt's extended boolean spellings: `on`/`off`,
/// `true`/`false`, `yes`/`no`, `1`/`0`.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldDescriptor, FieldType, FieldValue};

    fn drive_format() -> Format {
        Format::new(
            "virtio-blk",
            vec![
                FieldDescriptor::new("file", FieldType::String).as_default_key(),
                FieldDescriptor::new("media", FieldType::String)
                    .with_enum(vec!["disk", "cdrom"])
                    .with_default(FieldValue::String("disk".to_string())),
                FieldDescriptor::new("iothread", FieldType::Bool)
                    .with_default(FieldValue::Bool(false)),
                FieldDescriptor::new("size", FieldType::Integer),
            ],
        )
    }

    #[test]
    fn test_parse_default_key_and_keyed() {
        let mut registry = SchemaRegistry::new();
        registry.register(drive_format());

        let map = registry
            .parse_property_string("virtio-blk", "local:vm-100-disk-0,media=disk,iothread=on")
            .unwrap();
        assert_eq!(map.get("file").unwrap().as_str().unwrap(), "local:vm-100-disk-0");
        assert_eq!(map.get("iothread").unwrap().as_bool().unwrap(), true);
    }

    #[test]
    fn test_unknown_key_errors() {
        let mut registry = SchemaRegistry::new();
        registry.register(drive_format());
        let err = registry
            .parse_property_string("virtio-blk", "file=foo,bogus=1")
            .unwrap_err();
        assert!(matches!(err, SchemaError::UnknownKey(_, _)));
    }

    #[test]
    fn test_duplicate_assignment_errors() {
        let mut registry = SchemaRegistry::new();
        registry.register(drive_format());
        let err = registry
            .parse_property_string("virtio-blk", "media=disk,media=cdrom")
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateAssignment(_)));
    }

    #[test]
    fn test_enum_violation() {
        let mut registry = SchemaRegistry::new();
        registry.register(drive_format());
        let err = registry
            .parse_property_string("virtio-blk", "media=floppy")
            .unwrap_err();
        assert!(matches!(err, SchemaError::EnumViolation { .. }));
    }

    #[test]
    fn test_print_round_trip() {
        let mut registry = SchemaRegistry::new();
        registry.register(drive_format());
        let map = registry
            .parse_property_string("virtio-blk", "local:vm-100-disk-0,iothread=on")
            .unwrap();
        let printed = registry
            .print_property_string("virtio-blk", &map, &[])
            .unwrap();
        assert_eq!(printed, "local:vm-100-disk-0,media=disk,iothread=1");
    }

    #[test]
    fn test_skip_keys() {
        let mut registry = SchemaRegistry::new();
        registry.register(drive_format());
        let map = registry
            .parse_property_string("virtio-blk", "local:vm-100-disk-0,size=1024")
            .unwrap();
        let printed = registry
            .print_property_string("virtio-blk", &map, &["size"])
            .unwrap();
        assert!(!printed.contains("size"));
    }
}
