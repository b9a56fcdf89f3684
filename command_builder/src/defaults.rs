//! Knobs the caller supplies rather than hard-codes: QEMU binary path, the
//! node's OVMF firmware location, default VGA/CPU model, and the bridge
//! network script invoked for tap devices.

#[derive(Debug, Clone)]
pub struct Defaults {
    pub qemu_binary: String,
    pub ovmf_code_path: String,
    pub ovmf_vars_template_path: String,
    pub default_vga: String,
    pub default_cpu: String,
    pub bridge_script: String,
    pub oui_prefix: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Defaults {
            qemu_binary: "qemu-system-x86_64".to_string(),
            ovmf_code_path: "/usr/share/OVMF/OVMF_CODE.fd".to_string(),
            ovmf_vars_template_path: "/usr/share/OVMF/OVMF_VARS.fd".to_string(),
            default_vga: "std".to_string(),
            default_cpu: "kvm64".to_string(),
            bridge_script: "/usr/share/vmctl/pve-bridge".to_string(),
            oui_prefix: "52:54:00".to_string(),
        }
    }
}
