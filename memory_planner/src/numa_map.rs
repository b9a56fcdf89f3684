//! NUMA host/guest mapping: if the config defines explicit `numaN`
//! entries, those define guest->host node mapping and the memory sum
//! invariant; otherwise memory is split evenly across sockets.

use config::NumaNode;

#[derive(Debug, Clone)]
pub struct NumaMapping {
    /// Guest node index -> host node index.
    pub guest_to_host: Vec<u32>,
    /// Guest node index -> memory in MB.
    pub guest_memory_mb: Vec<u64>,
}

/// Build the mapping from either the explicit `numaN` entries or, absent
/// those, an even split across `sockets`, one guest node per socket mapped
/// 1:1 to the corresponding host node.
pub fn build_mapping(
    numa_nodes: &[NumaNode],
    sockets: u32,
    static_memory_mb: u64,
) -> Result<NumaMapping, String> {
    if !numa_nodes.is_empty() {
        let sum: u64 = numa_nodes.iter().map(|n| n.memory_mb).sum();
        if sum != static_memory_mb {
            return Err(format!(
                "numa memory sum {} does not equal static memory {}",
                sum, static_memory_mb
            ));
        }
        let guest_to_host = numa_nodes
            .iter()
            .map(|n| n.hostnodes.first().map(|(lo, _)| *lo).unwrap_or(0))
            .collect();
        let guest_memory_mb = numa_nodes.iter().map(|n| n.memory_mb).collect();
        return Ok(NumaMapping {
            guest_to_host,
            guest_memory_mb,
        });
    }

    let sockets = sockets.max(1);
    let per_socket = static_memory_mb / sockets as u64;
    let remainder = static_memory_mb % sockets as u64;
    let mut guest_memory_mb = vec![per_socket; sockets as usize];
    if remainder > 0 {
        guest_memory_mb[0] += remainder;
    }

    Ok(NumaMapping {
        guest_to_host: (0..sockets).collect(),
        guest_memory_mb,
    })
}

pub fn guest_node_count(mapping: &NumaMapping) -> u32 {
    mapping.guest_to_host.len() as u32
}
