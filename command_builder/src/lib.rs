//! Deterministic mapping from a VM's `Config` to the QEMU argv that
//! materializes it, given node-local defaults and a host capability probe.

pub mod bootindex;
pub mod builder;
pub mod cpu;
pub mod defaults;
pub mod error;
pub mod host_caps;

pub use builder::{build_command, BuildOutput};
pub use defaults::Defaults;
pub use error::{CommandBuilderError, Result};
pub use host_caps::HostCaps;
