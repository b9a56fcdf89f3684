//! Two disjoint pending-change classes, plus everything else (cold-plug).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
    FastPlug,
    RuntimeClassified,
    ColdPlug,
}

const FAST_PLUG_KEYS: &[&str] = &[
    "lock",
    "name",
    "onboot",
    "shares",
    "startup",
    "description",
    "protection",
    "vmstatestorage",
    "tags",
];

const RUNTIME_SCALAR_KEYS: &[&str] = &[
    "tablet", "vcpus", "balloon", "memory", "cpuunits", "cpulimit", "hotplug", "agent",
];

pub(crate) fn numeric_suffix(key: &str, prefix: &str) -> bool {
    key.strip_prefix(prefix)
        .map(|suffix| !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

pub fn classify(key: &str) -> ChangeClass {
    if FAST_PLUG_KEYS.contains(&key) {
        return ChangeClass::FastPlug;
    }
    if RUNTIME_SCALAR_KEYS.contains(&key)
        || numeric_suffix(key, "usb")
        || numeric_suffix(key, "net")
        || config::drive::split_key(key).is_ok()
    {
        return ChangeClass::RuntimeClassified;
    }
    ChangeClass::ColdPlug
}
