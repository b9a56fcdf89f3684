//! Fixed mapping from logical device identifier (`virtio3`, `hostpci0`,
//! `net17`, ...) to `(bus, slot)` pairs, for both PCI and PCIe, plus
//! on-demand PCIe root-port generation.

use std::collections::HashMap;

use thiserror::Error;

/// Reserved bridge addresses on bus 0, fixed by the spec: `(target_bus,
/// slot_on_bus_0)` -- the bridge device for `target_bus` itself lives at
/// that slot on bus 0 and is never handed out to an ordinary device.
const BRIDGE_SLOTS: [(u8, u8); 3] = [(1, 30), (2, 31), (3, 5)];

/// Devices per bus before rolling onto the next bridge bus.
const SLOTS_PER_BUS: u8 = 32;

/// First free slot on bus 0; slot 0 is reserved for the host bridge.
const BUS0_FIRST_FREE_SLOT: u8 = 1;

/// Highest bus this topology pre-enumerates (0-3, per the spec).
const MAX_BUS: u8 = 3;

/// Singleton logical ids, assigned the first ordinals in the fixed table.
const SINGLETONS: &[&str] = &["balloon0", "usb-bus", "ahci0"];

/// `(prefix, count)` for every indexed logical-id family, in the fixed
/// order their ordinals are assigned. This table, together with
/// `SINGLETONS`, is the closed set of logical ids `assign` accepts --
/// anything else is `PciError::UnknownLogicalId`.
const CATEGORIES: &[(&str, u32)] = &[
    ("ide", 4),      // ide0..ide3
    ("sata", 6),     // sata0..sata5
    ("scsihw", 5),   // scsihw0..scsihw4 (bus = scsi index / 7, max scsi index 30)
    ("scsi", 31),    // scsi0..scsi30
    ("virtio", 16),  // virtio0..virtio15
    ("efidisk", 1),  // efidisk0
    ("tpmstate", 1), // tpmstate0
    ("net", 32),     // net0..net31
    ("hostpci", 16), // hostpci0..hostpci15
];

#[derive(Error, Debug, PartialEq)]
pub enum PciError {
    #[error("unknown logical device id \"{0}\": the topology's id set is closed by construction")]
    UnknownLogicalId(String),
    #[error("PCI slot exhausted: no more devices can be placed")]
    SlotsExhausted,
    #[error("IDE device \"{0}\" cannot be placed on the pcie default bus of a q35 machine")]
    IdeOnPcieBus(String),
    #[error("PCIe root ports exhausted for hostpci passthrough (max 12 extra ports)")]
    RootPortsExhausted,
}

pub type Result<T> = std::result::Result<T, PciError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddress {
    pub bus: u8,
    pub slot: u8,
}

impl PciAddress {
    pub fn qemu_addr(self) -> String {
        format!("{:x}:{:02x}.0", self.bus, self.slot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineKind {
    /// i440fx-family machine: plain PCI, default bus `pci.0`.
    Pc,
    /// q35-family machine: PCIe, default bus `pcie.0`.
    Q35,
}

/// Resolve a logical id to its ordinal position in the fixed, closed-set
/// table. The ordinal -> address mapping (`address_for_ordinal`) never
/// depends on assignment order, so the same id always resolves to the
/// same `(bus, slot)` no matter which other ids were assigned before it.
fn ordinal_of(logical_id: &str) -> Result<usize> {
    if let Some(pos) = SINGLETONS.iter().position(|&s| s == logical_id) {
        return Ok(pos);
    }
    let mut base = SINGLETONS.len();
    for &(prefix, count) in CATEGORIES {
        if let Some(rest) = logical_id.strip_prefix(prefix) {
            if let Ok(index) = rest.parse::<u32>() {
                if index < count {
                    return Ok(base + index as usize);
                }
            }
        }
        base += count as usize;
    }
    Err(PciError::UnknownLogicalId(logical_id.to_string()))
}

/// The fixed slot sequence across buses 0-3: bus 0 skips slot 0 (host
/// bridge) and the three reserved bridge slots; buses 1-3 use the full
/// 32 slots of their own (bridged) bus.
fn slot_sequence() -> impl Iterator<Item = (u8, u8)> {
    (0..=MAX_BUS).flat_map(|bus| {
        let start = if bus == 0 { BUS0_FIRST_FREE_SLOT } else { 0 };
        (start..SLOTS_PER_BUS).filter_map(move |slot| {
            if bus == 0 && BRIDGE_SLOTS.iter().any(|&(_, bridge_slot)| bridge_slot == slot) {
                None
            } else {
                Some((bus, slot))
            }
        })
    })
}

fn address_for_ordinal(ordinal: usize) -> Result<PciAddress> {
    slot_sequence()
        .nth(ordinal)
        .map(|(bus, slot)| PciAddress { bus, slot })
        .ok_or(PciError::SlotsExhausted)
}

/// A constant mapping from logical device identifier to `(bus, slot)`,
/// closed over the id set in `SINGLETONS`/`CATEGORIES`. An instance only
/// remembers which of those fixed addresses it has actually handed out,
/// for `bridges_required`'s "buses with at least one device" bookkeeping
/// -- it never renumbers or reorders the underlying table.
pub struct PciTopology {
    machine: MachineKind,
    assignments: HashMap<String, PciAddress>,
    bridges_used: Vec<u8>,
    hostpci_root_ports: u32,
}

impl PciTopology {
    pub fn new(machine: MachineKind) -> Self {
        PciTopology {
            machine,
            assignments: HashMap::new(),
            bridges_used: Vec::new(),
            hostpci_root_ports: 0,
        }
    }

    pub fn machine(&self) -> MachineKind {
        self.machine
    }

    /// Look up `logical_id`'s fixed slot. IDE devices are refused on a
    /// q35 machine's default bus; anything outside the closed id set is
    /// `PciError::UnknownLogicalId`.
    pub fn assign(&mut self, logical_id: &str) -> Result<PciAddress> {
        if self.machine == MachineKind::Q35 && logical_id.starts_with("ide") {
            return Err(PciError::IdeOnPcieBus(logical_id.to_string()));
        }

        let address = address_for_ordinal(ordinal_of(logical_id)?)?;

        if address.bus > 0 && !self.bridges_used.contains(&address.bus) {
            self.bridges_used.push(address.bus);
        }
        self.assignments.insert(logical_id.to_string(), address);
        Ok(address)
    }

    /// Every bridge bus that has at least one device placed on it: these
    /// must each get a `pci-bridge` device emitted on bus 0 at the fixed
    /// reserved slot.
    pub fn bridges_required(&self) -> Vec<(u8, u8)> {
        BRIDGE_SLOTS
            .iter()
            .copied()
            .filter(|(bus, _)| self.bridges_used.contains(bus))
            .collect()
    }

    /// Assign the next PCIe root port for a `hostpciN` slot beyond the
    /// first four (which fit directly on bus 0/1). Ports 4-15 map onto
    /// function numbers 10.0-11.3.
    pub fn assign_root_port(&mut self) -> Result<(u8, u8)> {
        let port = 4 + self.hostpci_root_ports;
        if port > 15 {
            return Err(PciError::RootPortsExhausted);
        }
        self.hostpci_root_ports += 1;
        let function_index = port - 4;
        let slot = 10 + function_index / 8;
        let function = function_index % 8;
        Ok((slot as u8, function as u8))
    }

    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }
}
