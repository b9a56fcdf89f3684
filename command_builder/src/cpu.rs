//! CPU model string construction: per-model compatibility flags, the
//! `kvm=off` hypervisor-hiding switch, and Windows `hv_*` enlightenments.

/// Build the full `-cpu` model string (everything after `-cpu`).
pub fn build_cpu_model(
    cpu_type: &str,
    hidden: bool,
    ostype: Option<&str>,
    vendor: Option<&str>,
) -> String {
    let mut flags: Vec<String> = Vec::new();

    // vendor= comes first when present, matching QEMU's own convention.
    if let Some(vendor) = vendor {
        if vendor != "default" {
            flags.push(format!("vendor={}", vendor));
        }
    }

    match cpu_type {
        "kvm64" => {
            flags.push("+lahf_lm".to_string());
            flags.push("+sep".to_string());
        }
        "kvm32" => {
            flags.push("+sep".to_string());
        }
        "qemu64" | "host" | "max" => {}
        other if other.starts_with("Opteron") => {
            flags.push("-rdtscp".to_string());
        }
        "solaris" => {
            flags.push("-x2apic".to_string());
        }
        _ => {}
    }

    if let Some(os) = ostype {
        if os.starts_with("win") {
            flags.extend(hyperv_enlightenments().iter().map(|s| s.to_string()));
        }
    }

    if hidden {
        flags.push("kvm=off".to_string());
    }

    let mut parts = vec![cpu_type.to_string()];
    parts.extend(flags);
    parts.join(",")
}

/// Standard Hyper-V enlightenment set; the same handful for every modern
/// Windows guest, regardless of exact version.
fn hyperv_enlightenments() -> &'static [&'static str] {
    &[
        "hv_relaxed",
        "hv_spinlocks=0x1fff",
        "hv_vapic",
        "hv_time",
        "hv_vpindex",
        "hv_synic",
        "hv_stimer",
    ]
}
