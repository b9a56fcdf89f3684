//! The pure `(Config, Defaults, HostCaps) -> (Argv, VolumeList, SpicePort)`
//! mapping. Built up section by section, in the order QEMU arguments are
//! conventionally grouped, following the `Vec<String>`-pushing style the
//! pack's own QEMU launchers use.

use std::collections::BTreeMap;

use config::drive::{self, Interface};
use config::{net, numa, Config};
use pci_topology::{MachineKind, PciTopology};
use schema::SchemaRegistry;

use crate::bootindex::BootOrder;
use crate::cpu::build_cpu_model;
use crate::defaults::Defaults;
use crate::error::{CommandBuilderError, Result};
use crate::host_caps::HostCaps;

pub struct BuildOutput {
    pub argv: Vec<String>,
    pub volumes: Vec<String>,
    pub spice_port: Option<u16>,
}

pub fn build_command(
    vmid: u32,
    config: &Config,
    registry: &SchemaRegistry,
    defaults: &Defaults,
    caps: &HostCaps,
    runtime_dir: &std::path::Path,
) -> Result<BuildOutput> {
    let mut argv: Vec<String> = Vec::new();
    let mut volumes: Vec<String> = Vec::new();
    let name = config.get("name").unwrap_or("vm").to_string();
    let machine_type = config.get("machine").unwrap_or("pc-q35").to_string();
    let machine_kind = if machine_type.starts_with("q35") {
        MachineKind::Q35
    } else {
        MachineKind::Pc
    };
    let mut pci = PciTopology::new(machine_kind);

    push_identity(&mut argv, vmid, &name, runtime_dir);
    push_smbios(&mut argv, config, vmid);
    let spice_port = push_vga_and_spice(&mut argv, config, caps);
    push_firmware(&mut argv, config, defaults, &mut volumes)?;
    push_usb(&mut argv, config, &mut pci)?;
    push_hostpci(&mut argv, config, &mut pci)?;
    push_serial_parallel(&mut argv, config);
    push_smp_and_cpu(&mut argv, config, defaults);
    push_memory(&mut argv, config)?;
    push_guest_agent(&mut argv, config);
    push_balloon(&mut argv, config, &mut pci)?;
    push_watchdog(&mut argv, config);
    push_drives(&mut argv, config, registry, &mut pci, &mut volumes)?;
    push_net(&mut argv, config, registry, defaults, vmid, &mut pci)?;
    push_bridges(&mut argv, &pci);
    push_rtc_and_global(&mut argv, config, &machine_type);
    push_extra_args(&mut argv, config);

    Ok(BuildOutput {
        argv,
        volumes,
        spice_port,
    })
}

fn push_identity(argv: &mut Vec<String>, vmid: u32, name: &str, runtime_dir: &std::path::Path) {
    argv.extend(["-id".to_string(), vmid.to_string()]);
    argv.extend(["-name".to_string(), name.to_string()]);
    let qmp_path = runtime_dir.join(format!("{}.qmp", vmid));
    argv.extend([
        "-chardev".to_string(),
        format!("socket,id=qmp,path={},server=on,wait=off", qmp_path.display()),
    ]);
    argv.extend(["-mon".to_string(), "chardev=qmp,mode=control".to_string()]);
    let pidfile = runtime_dir.join(format!("{}.pid", vmid));
    argv.extend(["-pidfile".to_string(), pidfile.display().to_string()]);
    argv.push("-daemonize".to_string());
}

fn push_smbios(argv: &mut Vec<String>, config: &Config, vmid: u32) {
    let uuid = config.get("smbios1").unwrap_or_default();
    let mut fields = vec![format!("type=1")];
    if !uuid.is_empty() {
        fields.push(format!("uuid={}", uuid));
    } else {
        fields.push(format!("serial={}", vmid));
    }
    argv.extend(["-smbios".to_string(), fields.join(",")]);
}

/// VGA device and optional tablet; tablet is suppressed when spice is
/// active or vga is a serial terminal, per the rule table.
fn push_vga_and_spice(argv: &mut Vec<String>, config: &Config, caps: &HostCaps) -> Option<u16> {
    let vga = config.get("vga").unwrap_or("std");
    let is_serial = vga == "serial0";
    let is_qxl = vga.starts_with("qxl");

    if !is_serial {
        argv.extend(["-vga".to_string(), vga.to_string()]);
    }

    let mut spice_port = None;
    if is_qxl && caps.spice_available {
        let port = 3128;
        argv.extend([
            "-spice".to_string(),
            format!("port={},addr=127.0.0.1,disable-ticketing=on", port),
        ]);
        argv.extend([
            "-device".to_string(),
            "virtio-serial-pci,id=spice".to_string(),
        ]);
        argv.extend([
            "-chardev".to_string(),
            "spicevmc,id=vdagent,name=vdagent".to_string(),
        ]);
        argv.extend([
            "-device".to_string(),
            "virtserialport,chardev=vdagent,name=com.redhat.spice.0".to_string(),
        ]);
        spice_port = Some(port);
    }

    let tablet_disabled = config.get("tablet") == Some("0");
    if !tablet_disabled && !is_serial && spice_port.is_none() {
        argv.push("-usb".to_string());
        argv.extend(["-device".to_string(), "usb-tablet".to_string()]);
    }

    spice_port
}

/// OVMF firmware drives when `bios=ovmf`: two `-drive if=pflash` entries.
fn push_firmware(
    argv: &mut Vec<String>,
    config: &Config,
    defaults: &Defaults,
    volumes: &mut Vec<String>,
) -> Result<()> {
    if config.get("bios") != Some("ovmf") {
        return Ok(());
    }
    argv.extend([
        "-drive".to_string(),
        format!(
            "if=pflash,unit=0,format=raw,readonly=on,file={}",
            defaults.ovmf_code_path
        ),
    ]);
    match config.get("efidisk0") {
        Some(value) => {
            let volid = value.split(',').next().unwrap_or_default().to_string();
            argv.extend([
                "-drive".to_string(),
                format!("if=pflash,unit=1,format=raw,file={}", volid),
            ]);
            volumes.push(volid);
        }
        None => {
            log::warn!("bios=ovmf but efidisk0 is not configured; using a temporary vars file");
            argv.extend([
                "-drive".to_string(),
                format!(
                    "if=pflash,unit=1,format=raw,file={}",
                    defaults.ovmf_vars_template_path
                ),
            ]);
        }
    }
    Ok(())
}

/// USB controller count driven by configured `usbN` slots; xhci when any
/// slot requests usb3.
fn push_usb(argv: &mut Vec<String>, config: &Config, pci: &mut PciTopology) -> Result<()> {
    let mut max_index = None;
    let mut needs_xhci = false;
    for n in 0..=4u32 {
        let key = format!("usb{}", n);
        if let Some(value) = config.get(&key) {
            max_index = Some(n);
            if value.contains("usb3=1") {
                needs_xhci = true;
            }
        }
    }
    if max_index.is_none() {
        return Ok(());
    }
    let addr = pci.assign("usb-bus")?;
    if needs_xhci {
        argv.extend([
            "-device".to_string(),
            format!("qemu-xhci,id=usb-bus,addr={}", addr.qemu_addr()),
        ]);
    } else {
        argv.extend([
            "-device".to_string(),
            format!("piix3-usb-uhci,id=usb-bus,addr={}", addr.qemu_addr()),
        ]);
    }
    Ok(())
}

/// Host PCI passthrough via vfio-pci, multifunction when several functions
/// of the same host device are requested under one `hostpciN` entry.
fn push_hostpci(argv: &mut Vec<String>, config: &Config, pci: &mut PciTopology) -> Result<()> {
    for n in 0..16u32 {
        let key = format!("hostpci{}", n);
        let Some(value) = config.get(&key) else { continue };
        let host_addr = value.split(',').next().unwrap_or_default();
        let addr = pci.assign(&key)?;
        argv.extend([
            "-device".to_string(),
            format!(
                "vfio-pci,host={},id={},addr={}",
                host_addr,
                key,
                addr.qemu_addr()
            ),
        ]);
    }
    Ok(())
}

fn push_serial_parallel(argv: &mut Vec<String>, config: &Config) {
    for n in 0..4u32 {
        let key = format!("serial{}", n);
        let Some(value) = config.get(&key) else { continue };
        let chardev_id = format!("serial{}", n);
        if value == "socket" {
            argv.extend([
                "-chardev".to_string(),
                format!("socket,id={},path=/var/run/vmctl/{}.serial,server=on,wait=off", chardev_id, chardev_id),
            ]);
        } else {
            argv.extend([
                "-chardev".to_string(),
                format!("tty,id={},path={}", chardev_id, value),
            ]);
        }
        argv.extend(["-device".to_string(), format!("isa-serial,chardev={}", chardev_id)]);
    }
    for n in 0..3u32 {
        let key = format!("parallel{}", n);
        let Some(value) = config.get(&key) else { continue };
        argv.extend(["-parallel".to_string(), value.to_string()]);
    }
}

/// `-smp` and explicit per-vCPU `-device cpu-...` entries when CPU hot-plug
/// is enabled; CPU model string from `cpu.rs`.
fn push_smp_and_cpu(argv: &mut Vec<String>, config: &Config, defaults: &Defaults) {
    let sockets: u32 = config.get("sockets").and_then(|s| s.parse().ok()).unwrap_or(1);
    let cores: u32 = config.get("cores").and_then(|s| s.parse().ok()).unwrap_or(1);
    let vcpus: u32 = config.get("vcpus").and_then(|s| s.parse().ok()).unwrap_or(sockets * cores);
    let maxcpus = sockets * cores;
    let hotplug_enabled = config
        .get("hotplug")
        .map(|s| s.split(',').any(|f| f == "cpu"))
        .unwrap_or(false);

    if hotplug_enabled {
        argv.extend([
            "-smp".to_string(),
            format!("cpus=1,sockets={},cores={},maxcpus={}", sockets, cores, maxcpus),
        ]);
    } else {
        argv.extend([
            "-smp".to_string(),
            format!("cpus={},sockets={},cores={},maxcpus={}", vcpus, sockets, cores, maxcpus),
        ]);
    }

    let cpu_type = config.get("cpu").unwrap_or(&defaults.default_cpu);
    let hidden = config.get("cpu").map(|s| s.contains("hidden=1")).unwrap_or(false);
    let ostype = config.get("ostype");
    let vendor = config.get("cpuvendor");
    let model = build_cpu_model(cpu_type, hidden, ostype, vendor);
    argv.extend(["-cpu".to_string(), model]);

    if hotplug_enabled {
        for i in 1..vcpus {
            let socket_id = i / cores;
            let core_id = i % cores;
            argv.extend([
                "-device".to_string(),
                format!(
                    "{},socket-id={},core-id={},thread-id=0,id=cpu{}",
                    cpu_type, socket_id, core_id, i
                ),
            ]);
        }
    }
}

/// Memory backend and NUMA objects via MemoryPlanner's NUMA mapping.
fn push_memory(argv: &mut Vec<String>, config: &Config) -> Result<()> {
    let memory_mb: u64 = config.get("memory").and_then(|s| s.parse().ok()).unwrap_or(512);
    let sockets: u32 = config.get("sockets").and_then(|s| s.parse().ok()).unwrap_or(1);
    let max_mem: u64 = config
        .get("hotplug")
        .filter(|s| s.split(',').any(|f| f == "memory"))
        .and(config.get("maxmem"))
        .and_then(|s| s.parse().ok())
        .unwrap_or(memory_mb);

    let mut numa_nodes = Vec::new();
    for n in 0..8u32 {
        let key = format!("numa{}", n);
        if let Some(value) = config.get(&key) {
            numa_nodes.push(numa::parse_numa_node(value).map_err(CommandBuilderError::Config)?);
        }
    }

    let mapping = memory_planner::numa_map::build_mapping(&numa_nodes, sockets, memory_mb)
        .map_err(CommandBuilderError::NumaMapping)?;

    argv.extend([
        "-m".to_string(),
        format!("size={}M,slots=255,maxmem={}M", memory_mb, max_mem),
    ]);

    for (guest_node, &mem_mb) in mapping.guest_memory_mb.iter().enumerate() {
        let id = format!("mem{}", guest_node);
        argv.extend([
            "-object".to_string(),
            format!("memory-backend-ram,id={},size={}M", id, mem_mb),
        ]);
        argv.extend([
            "-numa".to_string(),
            format!("node,nodeid={},memdev={}", guest_node, id),
        ]);
    }

    Ok(())
}

fn push_guest_agent(argv: &mut Vec<String>, config: &Config) {
    if config.get("agent").map(|s| s.starts_with('1')).unwrap_or(false) {
        argv.extend([
            "-chardev".to_string(),
            "socket,id=qga,path=/var/run/vmctl/qga.sock,server=on,wait=off".to_string(),
        ]);
        argv.extend([
            "-device".to_string(),
            "virtio-serial".to_string(),
        ]);
        argv.extend([
            "-device".to_string(),
            "virtserialport,chardev=qga,name=org.qemu.guest_agent.0".to_string(),
        ]);
    }
}

fn push_balloon(argv: &mut Vec<String>, config: &Config, pci: &mut PciTopology) -> Result<()> {
    if config.get("balloon") == Some("0") {
        return Ok(());
    }
    let addr = pci.assign("balloon0")?;
    argv.extend([
        "-device".to_string(),
        format!("virtio-balloon-pci,id=balloon0,addr={}", addr.qemu_addr()),
    ]);
    Ok(())
}

fn push_watchdog(argv: &mut Vec<String>, config: &Config) {
    let Some(value) = config.get("watchdog") else { return };
    if value == "none" {
        return;
    }
    let model = value.split(',').next().unwrap_or("i6300esb");
    argv.extend(["-device".to_string(), model.to_string()]);
}

/// Block devices: iterate drives in canonical order, assign bootindex from
/// `boot=order=...` (falling back to the legacy `bootdisk` scalar), emit
/// `-drive` plus the matching `-device`.
fn push_drives(
    argv: &mut Vec<String>,
    config: &Config,
    registry: &SchemaRegistry,
    pci: &mut PciTopology,
    volumes: &mut Vec<String>,
) -> Result<()> {
    let order_str = config
        .get("boot")
        .and_then(|b| b.strip_prefix("order="))
        .unwrap_or("cdn");
    let mut boot_order = BootOrder::parse(order_str);

    let bootdisk_key = config.get("bootdisk").map(str::to_string);
    let mut scsihw_created: BTreeMap<u32, bool> = BTreeMap::new();
    let mut sata_ahci_created = false;

    for interface in drive::valid_drive_names() {
        for index in 0..=interface.max_index() {
            let key = format!("{}{}", interface.as_str(), index);
            let Some(value) = config.get(&key) else { continue };
            let d = drive::parse_drive(registry, &key, value).map_err(CommandBuilderError::Config)?;
            if d.file != "none" {
                volumes.push(d.file.clone());
            }

            let bootindex = if bootdisk_key.as_deref() == Some(key.as_str()) {
                boot_order.next_for('c')
            } else if d.is_cdrom(true) {
                boot_order.next_for('d')
            } else {
                None
            };

            let drive_id = format!("drive-{}", key);
            let mut drive_args = vec![format!("file={}", d.file), format!("id={}", drive_id)];
            if let Some(cache) = &d.cache {
                drive_args.push(format!("cache={}", cache));
            }
            if let Some(aio) = &d.aio {
                drive_args.push(format!("aio={}", aio));
            }
            if let Some(rerror) = &d.rerror {
                drive_args.push(format!("rerror={}", rerror));
            }
            if let Some(werror) = &d.werror {
                drive_args.push(format!("werror={}", werror));
            }
            if let Some(cyls) = d.cyls {
                drive_args.push(format!("cyls={}", cyls));
            }
            if let Some(heads) = d.heads {
                drive_args.push(format!("heads={}", heads));
            }
            if let Some(secs) = d.secs {
                drive_args.push(format!("secs={}", secs));
            }
            if let Some(trans) = &d.trans {
                drive_args.push(format!("trans={}", trans));
            }
            push_throttling(&mut drive_args, &d);
            if d.media == config::Media::Cdrom {
                drive_args.push("media=cdrom".to_string());
            } else {
                drive_args.push("media=disk".to_string());
            }
            argv.extend(["-drive".to_string(), drive_args.join(",")]);

            let device_str = match interface {
                Interface::Virtio => {
                    let addr = pci.assign(&key)?;
                    format!(
                        "virtio-blk-pci,drive={},id={},addr={}",
                        drive_id,
                        key,
                        addr.qemu_addr()
                    )
                }
                Interface::Scsi => {
                    let bus = index / 7;
                    if !scsihw_created.contains_key(&bus) {
                        let hw_addr = pci.assign(&format!("scsihw{}", bus))?;
                        argv.extend([
                            "-device".to_string(),
                            format!("virtio-scsi-pci,id=scsihw{},addr={}", bus, hw_addr.qemu_addr()),
                        ]);
                        scsihw_created.insert(bus, true);
                    }
                    format!(
                        "scsi-hd,bus=scsihw{}.0,scsi-id={},drive={},id={}",
                        bus,
                        index % 7,
                        drive_id,
                        key
                    )
                }
                Interface::Sata => {
                    if !sata_ahci_created {
                        let ahci_addr = pci.assign("ahci0")?;
                        argv.extend([
                            "-device".to_string(),
                            format!("ahci,id=ahci0,addr={}", ahci_addr.qemu_addr()),
                        ]);
                        sata_ahci_created = true;
                    }
                    format!("ide-hd,bus=ahci0.{},drive={},id={}", index, drive_id, key)
                }
                Interface::Ide => format!("ide-hd,bus=ide.{},drive={},id={}", index / 2, drive_id, key),
                Interface::Efidisk | Interface::Tpmstate | Interface::Unused => continue,
            };

            if let Some(idx) = bootindex {
                argv.extend(["-device".to_string(), format!("{},bootindex={}", device_str, idx)]);
            } else {
                argv.extend(["-device".to_string(), device_str]);
            }
        }
    }
    Ok(())
}

/// Converts the config model's MB/s throttling fields into the `-drive`
/// line's byte-per-second and IOPS properties, mirroring how QEMU's own
/// `bps`/`bps_rd`/`bps_wr`/`iops*` drive options are named.
fn push_throttling(drive_args: &mut Vec<String>, d: &drive::Drive) {
    const MIB: f64 = 1024.0 * 1024.0;
    let mut push_bps = |name: &str, mbps: Option<f64>| {
        if let Some(mbps) = mbps {
            drive_args.push(format!("{}={}", name, (mbps * MIB) as u64));
        }
    };
    push_bps("bps", d.mbps);
    push_bps("bps_max", d.mbps_max);
    push_bps("bps_rd", d.mbps_rd);
    push_bps("bps_rd_max", d.mbps_rd_max);
    push_bps("bps_wr", d.mbps_wr);
    push_bps("bps_wr_max", d.mbps_wr_max);

    let mut push_iops = |name: &str, iops: Option<f64>| {
        if let Some(iops) = iops {
            drive_args.push(format!("{}={}", name, iops as u64));
        }
    };
    push_iops("iops", d.iops);
    push_iops("iops_max", d.iops_max);
    push_iops("iops_rd", d.iops_rd);
    push_iops("iops_rd_max", d.iops_rd_max);
    push_iops("iops_wr", d.iops_wr);
    push_iops("iops_wr_max", d.iops_wr_max);

    if let Some(v) = d.mbps_max_length {
        drive_args.push(format!("bps_max_length={}", v));
    }
    if let Some(v) = d.mbps_rd_max_length {
        drive_args.push(format!("bps_rd_max_length={}", v));
    }
    if let Some(v) = d.mbps_wr_max_length {
        drive_args.push(format!("bps_wr_max_length={}", v));
    }
    if let Some(v) = d.iops_max_length {
        drive_args.push(format!("iops_max_length={}", v));
    }
    if let Some(v) = d.iops_rd_max_length {
        drive_args.push(format!("iops_rd_max_length={}", v));
    }
    if let Some(v) = d.iops_wr_max_length {
        drive_args.push(format!("iops_wr_max_length={}", v));
    }
}

/// Network devices: tap backend with the bridge script, or user-mode NAT
/// when no bridge is configured.
fn push_net(
    argv: &mut Vec<String>,
    config: &Config,
    registry: &SchemaRegistry,
    defaults: &Defaults,
    vmid: u32,
    pci: &mut PciTopology,
) -> Result<()> {
    let order_str = config
        .get("boot")
        .and_then(|b| b.strip_prefix("order="))
        .unwrap_or("cdn");
    let mut boot_order = BootOrder::parse(order_str);

    let oui = parse_oui(&defaults.oui_prefix);

    for n in 0..32u32 {
        let key = format!("net{}", n);
        let Some(value) = config.get(&key) else { continue };
        let parsed = net::parse_net(registry, value).map_err(CommandBuilderError::Config)?;
        let netdev_id = format!("net{}", n);

        match &parsed.bridge {
            Some(_bridge) => {
                argv.extend([
                    "-netdev".to_string(),
                    format!(
                        "type=tap,id={},ifname=tap{}i{},script={}",
                        netdev_id, vmid, n, defaults.bridge_script
                    ),
                ]);
            }
            None => {
                argv.extend(["-netdev".to_string(), format!("type=user,id={}", netdev_id)]);
            }
        }

        let mac = parsed.macaddr.unwrap_or_else(|| net::generate_macaddr(oui, vmid, n));
        let addr = pci.assign(&key)?;
        let bootindex = boot_order.next_for('n');
        let mut device_args = vec![
            parsed.model.clone(),
            format!("mac={}", mac),
            format!("netdev={}", netdev_id),
            format!("addr={}", addr.qemu_addr()),
        ];
        if let Some(idx) = bootindex {
            device_args.push(format!("bootindex={}", idx));
        }
        argv.extend(["-device".to_string(), device_args.join(",")]);
    }
    Ok(())
}

fn parse_oui(s: &str) -> [u8; 3] {
    let mut out = [0x52, 0x54, 0x00];
    for (i, part) in s.split(':').take(3).enumerate() {
        if let Ok(b) = u8::from_str_radix(part, 16) {
            out[i] = b;
        }
    }
    out
}

/// PCI bridges on bus 0 for each bus that has any device assigned.
fn push_bridges(argv: &mut Vec<String>, pci: &PciTopology) {
    for (bus, slot) in pci.bridges_required() {
        argv.extend([
            "-device".to_string(),
            format!("pci-bridge,id=pci.{},chassis_nr={},bus=pci.0,addr={}", bus, bus, slot),
        ]);
    }
}

fn push_rtc_and_global(argv: &mut Vec<String>, config: &Config, machine_type: &str) {
    argv.extend(["-machine".to_string(), machine_type.to_string()]);
    let rtc_base = if config.get("localtime") == Some("1") {
        "localtime"
    } else {
        "utc"
    };
    argv.extend(["-rtc".to_string(), format!("base={},driftfix=slew", rtc_base)]);
    if config.get("kvm") == Some("0") {
        argv.extend(["-global".to_string(), "kvm-pit.lost_tick_policy=discard".to_string()]);
    }
}

fn push_extra_args(argv: &mut Vec<String>, config: &Config) {
    if let Some(extra) = config.get("args") {
        for part in extra.split_whitespace() {
            argv.push(part.to_string());
        }
    }
}
