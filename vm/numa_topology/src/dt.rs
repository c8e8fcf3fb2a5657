// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The device-tree front-end.
//!
//! The flattened-tree blob reader is an external collaborator; this module
//! consumes already-extracted records: `/cpus` children with an optional
//! `numa-node-id`, memory nodes with their `reg` ranges, and the optional
//! `numa/distance-map-v1` entries. The CPU's hardware id is its position in
//! the `/cpus` walk, matching the index the platform enumerates CPUs with.

use crate::discovery::Discovery;
use crate::discovery::NumaSource;
use crate::discovery::SourceError;
use crate::discovery::SourceKind;
use crate::NodeId;
use phys_range::PhysRange;

/// A `/cpus` child node.
#[derive(Copy, Clone, Debug)]
pub struct DtCpuNode {
    /// The `numa-node-id` property, if present and well-formed.
    pub numa_node_id: Option<u32>,
}

/// A memory node.
#[derive(Clone, Debug)]
pub struct DtMemoryNode {
    /// The `numa-node-id` property, if present and well-formed.
    pub numa_node_id: Option<u32>,
    /// The `reg` ranges.
    pub ranges: Vec<PhysRange>,
}

/// One entry of a `distance-map-v1` matrix.
#[derive(Copy, Clone, Debug)]
pub struct DtDistanceEntry {
    /// Source node id.
    pub from: u32,
    /// Destination node id.
    pub to: u32,
    /// Relative access cost.
    pub distance: u32,
}

/// A NUMA description read from a device tree.
#[derive(Clone, Debug, Default)]
pub struct DtSource {
    /// CPU nodes in enumeration order.
    pub cpus: Vec<DtCpuNode>,
    /// Memory nodes.
    pub memory: Vec<DtMemoryNode>,
    /// Distance map entries, if the tree carries a distance map.
    pub distance_map: Vec<DtDistanceEntry>,
}

impl NumaSource for DtSource {
    fn kind(&self) -> SourceKind {
        SourceKind::DeviceTree
    }

    fn probe(&self, state: &mut Discovery) -> Result<(), SourceError> {
        for (cpu, dt_cpu) in self.cpus.iter().enumerate() {
            // A CPU without a usable id stays unassigned; the round-robin
            // pass gives it a node later.
            let Some(nid) = dt_cpu.numa_node_id else {
                tracing::warn!(cpu, "cpu node without numa-node-id");
                continue;
            };
            let Some(node) = NodeId::new(nid as usize) else {
                tracing::warn!(cpu, nid, "cpu numa-node-id out of range");
                continue;
            };
            state.record_cpu_affinity(cpu as u64, node);
        }

        for dt_mem in &self.memory {
            // Unlike CPUs, memory with no owner poisons the whole layout:
            // the coverage check could never attribute it.
            let Some(nid) = dt_mem.numa_node_id else {
                tracing::warn!("memory node without numa-node-id");
                state.fail();
                continue;
            };
            let Some(node) = NodeId::new(nid as usize) else {
                tracing::warn!(nid, "memory numa-node-id out of range");
                state.fail();
                continue;
            };
            for &range in &dt_mem.ranges {
                state.register_memory_affinity(node, range, false);
            }
        }

        for entry in &self.distance_map {
            if let Err(error) = state
                .distance
                .set_symmetric(entry.from, entry.to, entry.distance)
            {
                tracing::warn!(
                    error = &error as &dyn core::error::Error,
                    "bad distance-map entry"
                );
                state.fail();
            }
        }

        Ok(())
    }
}
