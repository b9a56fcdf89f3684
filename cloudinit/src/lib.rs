//! Cloud-init ISO generation: user-data, network-config and meta-data for
//! one of the `nocloud`, `configdrive2` or `opennebula` formats, with
//! `cicustom` snippet overrides, committed onto the fixed-size cloud-init
//! volume.

pub mod commit;
pub mod error;
pub mod metadata;
pub mod networkconfig;
pub mod userdata;

use std::path::Path;

use config::Config;
use schema::SchemaRegistry;

pub use commit::{GeneratedFiles, SIZE_BUDGET_BYTES, VOLUME_SIZE_BYTES};
pub use error::{CloudinitError, Result};

/// Config keys whose change in the pending overlay requires regenerating
/// the cloud-init image before any other hotplug step proceeds.
pub const REGENERATION_TRIGGERS: &[&str] = &[
    "name",
    "searchdomain",
    "nameserver",
    "ciuser",
    "cipassword",
    "sshkeys",
    "ciupgrade",
    "cicustom",
];

/// True if any key that would require regenerating the cloud-init image
/// is touched, including any `netN`/`ipconfigN` pair.
pub fn regeneration_required(changed_keys: &[String]) -> bool {
    changed_keys.iter().any(|key| {
        REGENERATION_TRIGGERS.contains(&key.as_str())
            || key.starts_with("net")
            || key.starts_with("ipconfig")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudinitFormat {
    Nocloud,
    Configdrive2,
    Opennebula,
}

impl CloudinitFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "nocloud" => Some(CloudinitFormat::Nocloud),
            "configdrive2" => Some(CloudinitFormat::Configdrive2),
            "opennebula" => Some(CloudinitFormat::Opennebula),
            _ => None,
        }
    }

    /// Select the format from `citype` if set, else default from `ostype`:
    /// Windows guests default to `configdrive2`, everything else to
    /// `nocloud`.
    pub fn resolve(config: &Config) -> Self {
        if let Some(citype) = config.get("citype") {
            if let Some(format) = CloudinitFormat::from_str(citype) {
                return format;
            }
        }
        match config.get("ostype") {
            Some(ostype) if ostype.starts_with("win") => CloudinitFormat::Configdrive2,
            _ => CloudinitFormat::Nocloud,
        }
    }
}

/// One of the four producible fields, so `cicustom=<field>=<volid>` can
/// select a generated field to override with a volume's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnippetField {
    User,
    Network,
    Meta,
    Vendor,
}

/// Parse `cicustom`'s `user=<volid>,network=<volid>,meta=<volid>,vendor=<volid>`
/// form into the subset of overrides present.
pub fn parse_cicustom(value: &str) -> Vec<(SnippetField, String)> {
    let mut out = Vec::new();
    for part in value.split(',') {
        if let Some((key, volid)) = part.split_once('=') {
            let field = match key {
                "user" => SnippetField::User,
                "network" => SnippetField::Network,
                "meta" => SnippetField::Meta,
                "vendor" => SnippetField::Vendor,
                _ => continue,
            };
            out.push((field, volid.to_string()));
        }
    }
    out
}

/// Build the three generated files for `name`/`vmid`, applying any
/// `cicustom` override by substituting `resolve_snippet`'s content for
/// the matching field instead of the generated one.
pub fn build_generated_files(
    registry: &SchemaRegistry,
    config: &Config,
    name: &str,
    vmid: u32,
    oui_prefix: [u8; 3],
    resolve_snippet: impl Fn(&str) -> Result<String>,
) -> Result<GeneratedFiles> {
    let overrides: Vec<(SnippetField, String)> = config
        .get("cicustom")
        .map(parse_cicustom)
        .unwrap_or_default();

    let mut user_data = userdata::build_user_data(config, name);
    let mut network_config = networkconfig::build_network_config(registry, config, oui_prefix, vmid)?;

    for (field, volid) in &overrides {
        match field {
            SnippetField::User => user_data = resolve_snippet(volid)?,
            SnippetField::Network => network_config = resolve_snippet(volid)?,
            _ => {}
        }
    }

    let mut meta_data = metadata::build_meta_data(name, &user_data, &network_config);
    for (field, volid) in &overrides {
        if *field == SnippetField::Meta {
            meta_data = resolve_snippet(volid)?;
        }
    }

    Ok(GeneratedFiles { user_data, network_config, meta_data })
}

/// Build and commit the cloud-init image for `vmid` onto `target_volume`.
pub fn generate_and_commit(
    registry: &SchemaRegistry,
    config: &Config,
    name: &str,
    vmid: u32,
    oui_prefix: [u8; 3],
    runtime_dir: &Path,
    target_volume: &Path,
    resolve_snippet: impl Fn(&str) -> Result<String>,
) -> Result<()> {
    let files = build_generated_files(registry, config, name, vmid, oui_prefix, resolve_snippet)?;
    let scratch_dir = commit::scratch_dir_for(runtime_dir, vmid);
    commit::commit(&files, &scratch_dir, target_volume)
}
