//! VM configuration domain model: `Drive`, `Net`, `NumaNode`, `Config` (with
//! its pending overlay and snapshots table), and the persisted config-file
//! codec.

pub mod codec;
pub mod config;
pub mod drive;
pub mod error;
pub mod net;
pub mod numa;
pub mod usb;

pub use config::{Config, DeleteEntry, LockKind, PendingOverlay, SnapState, Snapshot};
pub use drive::{Drive, Interface, Media};
pub use error::{ConfigError, Result};
pub use net::Net;
pub use numa::NumaNode;
pub use usb::{Usb, UsbSource};

/// Build a `SchemaRegistry` with every format this crate registers: drive
/// formats per interface, the net format, and the usb format.
pub fn build_registry() -> schema::SchemaRegistry {
    let mut registry = schema::SchemaRegistry::new();
    drive::register_drive_formats(&mut registry);
    net::register_net_format(&mut registry);
    usb::register_usb_format(&mut registry);
    registry
}
