//! DIMM slot enumeration (`foreach_dimm` / `foreach_reverse_dimm`), NUMA
//! host/guest mapping, hugepage-size selection, and allocation/rollback
//! against the host's sysfs hugepage counters.

pub mod dimm;
pub mod hugepage;
pub mod numa_map;

pub use dimm::{base_static_memory_mb, foreach_dimm, foreach_reverse_dimm, DimmRecord, HugepageMode};
pub use hugepage::{allocate, read_host_topology, release_reservation, topology_from_dimms, HugepageError, HugepageSysfs, HugepageTopology};
pub use numa_map::{guest_node_count, NumaMapping};

/// Upper bound on guest memory, in MB, enforced by `MemoryHotplug`.
pub const MAX_MEM_MB: u64 = 4_194_304;
