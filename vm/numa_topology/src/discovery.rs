// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The shared discovery state mutated by the firmware front-ends.
//!
//! Both front-ends funnel their records through [`Discovery`]: memory
//! affinity goes through one conflict/coalesce path, CPU affinity through one
//! hardware-id association list, distances into one matrix. Inconsistencies
//! set a single failure flag; parsing continues so every problem in the
//! tables gets logged, but the orchestrator discards everything once the flag
//! is set.

use crate::distance::DistanceMatrix;
use crate::memblk::MemblkRegistry;
use crate::nodes::NodeSpans;
use crate::pxm::PxmMap;
use crate::NodeId;
use phys_range::PhysRange;
use thiserror::Error;

/// Which kind of firmware description a source consumes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    /// ACPI SRAT/SLIT/MADT tables.
    Acpi,
    /// A flattened device tree.
    DeviceTree,
}

/// A structural error from a firmware source.
///
/// Raised only when a table is too damaged to walk at all; record-level
/// inconsistencies are reported through [`Discovery::fail`] instead so the
/// walk can continue for diagnostics.
#[derive(Debug, Error)]
pub enum SourceError {
    /// An ACPI table failed structural validation.
    #[error("malformed ACPI table")]
    Acpi(#[from] acpi_numa_spec::ParseError),
}

/// A firmware topology source.
pub trait NumaSource {
    /// The kind of description this source reads, used to honor the
    /// `noacpi` boot option.
    fn kind(&self) -> SourceKind;

    /// Walks the firmware description, feeding `state`.
    ///
    /// Returning `Err`, or leaving `state` failed, makes the orchestrator
    /// fall back to the dummy topology.
    fn probe(&self, state: &mut Discovery) -> Result<(), SourceError>;
}

/// Mutable state accumulated while probing a firmware source.
#[derive(Debug)]
pub struct Discovery {
    pub(crate) memblks: MemblkRegistry,
    pub(crate) spans: NodeSpans,
    pub(crate) pxm: PxmMap,
    /// Hardware CPU id (APIC id, MPIDR, or device-tree cpu index) to node
    /// edges, in record order.
    hwid_to_node: Vec<(u64, NodeId)>,
    pub(crate) distance: DistanceMatrix,
    /// Highest end address seen on a hot-pluggable memory record.
    pub(crate) mem_hotplug: u64,
    /// Whether any memory affinity has been accepted from the source.
    firmware_active: bool,
    failed: bool,
}

impl Discovery {
    /// Returns empty discovery state.
    pub fn new() -> Self {
        Self {
            memblks: MemblkRegistry::new(),
            spans: NodeSpans::new(),
            pxm: PxmMap::new(),
            hwid_to_node: Vec::new(),
            distance: DistanceMatrix::new(),
            mem_hotplug: 0,
            firmware_active: false,
            failed: false,
        }
    }

    /// Records a memory affinity range for `node`.
    ///
    /// Overlap with an existing block owned by a different node is fatal.
    /// Overlap with the same node widens the existing block, unless the
    /// hotplug flags disagree, which is also fatal.
    pub fn register_memory_affinity(&mut self, node: NodeId, range: PhysRange, hotplug: bool) {
        if range.is_empty() {
            return;
        }
        if let Some(idx) = self.memblks.conflicting(&range) {
            let existing = *self.memblks.get(idx);
            if existing.node != node {
                tracing::warn!(
                    node = %node,
                    start = range.start(),
                    end = range.end(),
                    conflicting_node = %existing.node,
                    "memory range overlaps another node"
                );
                self.fail();
                return;
            }
            if existing.hotplug != hotplug {
                tracing::warn!(
                    node = %node,
                    start = range.start(),
                    end = range.end(),
                    "hotplug flag mismatch on overlapping range"
                );
                self.fail();
                return;
            }
            tracing::debug!(
                node = %node,
                start = range.start(),
                end = range.end(),
                "merging overlapping memory range"
            );
            self.memblks.widen(idx, &range);
            self.spans.coalesce(node, range);
        } else {
            if let Err(err) = self.memblks.register(node, range, hotplug) {
                tracing::warn!(
                    error = &err as &dyn core::error::Error,
                    "discarding memory range"
                );
                self.fail();
                return;
            }
            self.spans.coalesce(node, range);
        }
        if hotplug {
            self.mem_hotplug = self.mem_hotplug.max(range.end());
        }
        self.firmware_active = true;
    }

    /// Records a hardware-id to node edge from a CPU affinity record.
    pub fn record_cpu_affinity(&mut self, hwid: u64, node: NodeId) {
        self.hwid_to_node.push((hwid, node));
        self.spans.processor_parsed.set(node);
    }

    /// The node a CPU affinity record bound `hwid` to, if any.
    pub fn node_for_hwid(&self, hwid: u64) -> NodeId {
        self.hwid_to_node
            .iter()
            .find(|&&(h, _)| h == hwid)
            .map_or(NodeId::NONE, |&(_, n)| n)
    }

    /// Resolves a proximity domain to a dense node id, failing discovery on
    /// capacity overflow.
    pub fn resolve_pxm(&mut self, pxm: u32) -> NodeId {
        let node = self.pxm.resolve(pxm);
        if !node.is_some() {
            self.fail();
        }
        node
    }

    /// The memory blocks registered so far, for containment queries such as
    /// validating a hot-added range against node ownership.
    pub fn memblks(&self) -> &MemblkRegistry {
        &self.memblks
    }

    /// The highest end address seen on a hot-pluggable memory record.
    pub fn mem_hotplug(&self) -> u64 {
        self.mem_hotplug
    }

    /// Marks the source unreliable.
    ///
    /// The affinity associations built so far are dropped so nothing partial
    /// can leak; the memory block list is kept for continued conflict
    /// diagnostics and bulk-discarded by the orchestrator. Idempotent.
    pub fn fail(&mut self) {
        self.failed = true;
        self.firmware_active = false;
        self.pxm.reset();
        self.hwid_to_node.clear();
    }

    /// Whether the source has been marked unreliable.
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Whether the source produced any usable memory affinity.
    pub fn firmware_active(&self) -> bool {
        self.firmware_active && !self.failed
    }

    /// Discards everything, returning to the just-constructed state.
    /// Idempotent.
    pub fn reset(&mut self) {
        self.memblks.reset();
        self.spans.reset();
        self.pxm.reset();
        self.hwid_to_node.clear();
        self.distance.reset();
        self.mem_hotplug = 0;
        self.firmware_active = false;
        self.failed = false;
    }
}

impl Default for Discovery {
    fn default() -> Self {
        Self::new()
    }
}
