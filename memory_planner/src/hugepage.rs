//! Hugepage topology: a nested `{size_kb -> {host_node -> count}}` map,
//! allocated against the host's sysfs counters with rollback, under the
//! process-wide advisory lock.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::dimm::DimmRecord;

pub type HugepageTopology = BTreeMap<u64, BTreeMap<u32, u64>>;

#[derive(Error, Debug)]
pub enum HugepageError {
    #[error("failed to read hugepage counters for node {node} size {size_kb}kB: {source}")]
    Read {
        node: u32,
        size_kb: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write hugepage counters for node {node} size {size_kb}kB: {source}")]
    Write {
        node: u32,
        size_kb: u64,
        #[source]
        source: std::io::Error,
    },
    #[error("insufficient hugepages: requested {requested} of size {size_kb}kB on node {node}, only {available} available; rolled back")]
    Insufficient {
        node: u32,
        size_kb: u64,
        requested: u64,
        available: u64,
    },
    #[error(transparent)]
    Lock(#[from] util::lock::LockError),
}

pub type Result<T> = std::result::Result<T, HugepageError>;

/// Abstraction over the host sysfs hugepage tree, so allocation logic is
/// testable without touching `/sys`.
pub trait HugepageSysfs {
    fn read_nr(&self, node: u32, size_kb: u64) -> std::io::Result<u64>;
    fn read_free(&self, node: u32, size_kb: u64) -> std::io::Result<u64>;
    fn write_nr(&self, node: u32, size_kb: u64, count: u64) -> std::io::Result<()>;
}

/// Real sysfs-backed implementation, reading/writing
/// `/sys/devices/system/node/node<N>/hugepages/hugepages-<size>kB/{nr_hugepages,free_hugepages}`.
pub struct FsHugepageSysfs {
    pub context: util::context::RuntimeContext,
}

impl HugepageSysfs for FsHugepageSysfs {
    fn read_nr(&self, node: u32, size_kb: u64) -> std::io::Result<u64> {
        let path = self.context.node_hugepage_dir(node, size_kb).join("nr_hugepages");
        std::fs::read_to_string(path)?.trim().parse().map_err(to_io_err)
    }

    fn read_free(&self, node: u32, size_kb: u64) -> std::io::Result<u64> {
        let path = self
            .context
            .node_hugepage_dir(node, size_kb)
            .join("free_hugepages");
        std::fs::read_to_string(path)?.trim().parse().map_err(to_io_err)
    }

    fn write_nr(&self, node: u32, size_kb: u64, count: u64) -> std::io::Result<()> {
        let path = self.context.node_hugepage_dir(node, size_kb).join("nr_hugepages");
        std::fs::write(path, count.to_string())
    }
}

fn to_io_err(e: std::num::ParseIntError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
}

/// Build the `{size_kb -> {host_node -> count}}` topology implied by a
/// forward DIMM walk whose hugepage mode resolved to a concrete size.
pub fn topology_from_dimms(dimms: &[DimmRecord], size_kb: u64) -> HugepageTopology {
    let mut topology = HugepageTopology::new();
    let per_node = topology.entry(size_kb).or_default();
    for dimm in dimms {
        let pages = (dimm.size_mb * 1024) / (size_kb);
        *per_node.entry(dimm.numa_node).or_insert(0) += pages;
    }
    topology
}

pub fn read_host_topology(
    sysfs: &dyn HugepageSysfs,
    requested: &HugepageTopology,
) -> Result<HugepageTopology> {
    let mut host = HugepageTopology::new();
    for (&size_kb, per_node) in requested {
        let entry = host.entry(size_kb).or_default();
        for &node in per_node.keys() {
            let nr = sysfs
                .read_nr(node, size_kb)
                .map_err(|source| HugepageError::Read { node, size_kb, source })?;
            entry.insert(node, nr);
        }
    }
    Ok(host)
}

/// Allocate `requested` hugepages against the host. For each `(size,
/// host_node)`, if requested exceeds the free count, writes the delta into
/// `nr_hugepages`; if allocation still falls short, rolls back every
/// size/node pair to its original count and fails. Must be called while
/// holding the process-wide hugepage lock.
pub fn allocate(sysfs: &dyn HugepageSysfs, requested: &HugepageTopology) -> Result<()> {
    let mut original: BTreeMap<(u64, u32), u64> = BTreeMap::new();

    for (&size_kb, per_node) in requested {
        for (&node, &want) in per_node {
            let free = sysfs
                .read_free(node, size_kb)
                .map_err(|source| HugepageError::Read { node, size_kb, source })?;
            if want <= free {
                continue;
            }
            let current_nr = sysfs
                .read_nr(node, size_kb)
                .map_err(|source| HugepageError::Read { node, size_kb, source })?;
            original.entry((size_kb, node)).or_insert(current_nr);

            let delta = want - free;
            let new_nr = current_nr + delta;
            if let Err(source) = sysfs.write_nr(node, size_kb, new_nr) {
                rollback(sysfs, &original);
                return Err(HugepageError::Write { node, size_kb, source });
            }

            let free_after = sysfs
                .read_free(node, size_kb)
                .map_err(|source| HugepageError::Read { node, size_kb, source })?;
            if want > free_after {
                rollback(sysfs, &original);
                return Err(HugepageError::Insufficient {
                    node,
                    size_kb,
                    requested: want,
                    available: free_after,
                });
            }
        }
    }
    Ok(())
}

fn rollback(sysfs: &dyn HugepageSysfs, original: &BTreeMap<(u64, u32), u64>) {
    for (&(size_kb, node), &nr) in original {
        if let Err(e) = sysfs.write_nr(node, size_kb, nr) {
            log::error!(
                "failed to roll back hugepage count for node {} size {}kB: {}",
                node,
                size_kb,
                e
            );
        }
    }
}

/// Zero every size's system-wide `nr_hugepages` after VM start, releasing
/// reservation back to anonymous use.
pub fn release_reservation(sysfs: &dyn HugepageSysfs, sizes: &[u64], nodes: &[u32]) {
    for &size_kb in sizes {
        for &node in nodes {
            if let Err(e) = sysfs.write_nr(node, size_kb, 0) {
                log::warn!(
                    "failed to zero hugepage reservation for node {} size {}kB: {}",
                    node,
                    size_kb,
                    e
                );
            }
        }
    }
}
