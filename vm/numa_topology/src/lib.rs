// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Boot-time NUMA topology discovery and bookkeeping.
//!
//! This crate turns a firmware description of the machine's NUMA layout —
//! either ACPI tables (SRAT/SLIT/MADT) or a device tree — into a compact,
//! read-only [`Topology`]: an O(1) physical-address-to-node map, a per-CPU
//! node table, per-node spans, and a node distance matrix.
//!
//! Discovery is deliberately paranoid. Firmware affinity data is validated
//! for internal consistency (overlap conflicts, capacity overflows, coverage
//! of the whole RAM map), and any inconsistency anywhere discards the entire
//! source and falls back to a dummy single-node topology that is always
//! constructible from the RAM map alone. Bad NUMA data can degrade placement;
//! it can never fail boot.
//!
//! Construction runs single-threaded during early boot. The resulting
//! [`Topology`] is immutable and safe to share across processors.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod acpi;
mod cpumask;
mod discovery;
mod distance;
pub mod dt;
mod memblk;
mod memnodemap;
mod nodes;
mod options;
mod pxm;
mod topology;

pub use cpumask::CpuMask;
pub use discovery::Discovery;
pub use discovery::NumaSource;
pub use discovery::SourceError;
pub use discovery::SourceKind;
pub use distance::DistanceError;
pub use distance::DistanceMatrix;
pub use memblk::MemblkError;
pub use memblk::MemblkRegistry;
pub use memblk::MemoryBlock;
pub use memnodemap::IdentityPdx;
pub use memnodemap::MemNodeMap;
pub use memnodemap::MemNodeMapError;
pub use memnodemap::PdxCompressor;
pub use options::InvalidNumaOption;
pub use options::NumaOption;
pub use topology::discover;
pub use topology::CpuHwId;
pub use topology::NodeInfo;
pub use topology::Platform;
pub use topology::Topology;
pub use topology::TopologyKind;

/// Maximum number of NUMA nodes the tables are sized for.
pub const MAX_NUMNODES: usize = 64;

/// Capacity of the memory block registry. A node may own more than one block
/// (holes are allowed), so this exceeds the node count.
pub const NR_NODE_MEMBLKS: usize = MAX_NUMNODES * 2;

/// Relative access cost of a node to its own memory.
pub const LOCAL_DISTANCE: u8 = 10;

/// Default relative access cost between distinct nodes when no firmware
/// distance information is available.
pub const REMOTE_DISTANCE: u8 = 20;

/// Distance value meaning the pair of nodes is unreachable from each other,
/// used when firmware reports a cost the matrix cannot express.
pub const NO_DISTANCE: u8 = 0xff;

/// The coarsest possible address-to-node hash shift: the whole address space
/// collapses into a single table slot.
pub const MAX_HASH_SHIFT: u32 = 63;

/// A dense NUMA node identifier in `[0, MAX_NUMNODES)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u8);

impl NodeId {
    /// Sentinel for "no node assigned / unknown".
    pub const NONE: Self = Self(0xff);

    /// Node 0, the sole node of the dummy topology.
    pub const ZERO: Self = Self(0);

    /// Returns the node id for `index`, or `None` if out of range.
    pub fn new(index: usize) -> Option<Self> {
        if index < MAX_NUMNODES {
            Some(Self(index as u8))
        } else {
            None
        }
    }

    /// The dense index of this node.
    ///
    /// Panics if this is [`NodeId::NONE`].
    #[track_caller]
    pub fn index(&self) -> usize {
        assert!(*self != Self::NONE, "NodeId::NONE has no index");
        self.0 as usize
    }

    /// Whether this is a real node id rather than the sentinel.
    pub fn is_some(&self) -> bool {
        *self != Self::NONE
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_some() {
            write!(f, "{}", self.0)
        } else {
            f.write_str("none")
        }
    }
}

/// A bitmap over node ids, used for the online map and the per-source
/// "which nodes were parsed" bookkeeping.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeMask(u64);

const _: () = assert!(MAX_NUMNODES <= u64::BITS as usize);

impl NodeMask {
    /// The empty mask.
    pub const EMPTY: Self = Self(0);

    /// Sets `node` in the mask, returning whether it was already set.
    pub fn test_and_set(&mut self, node: NodeId) -> bool {
        let bit = 1 << node.index();
        let was = self.0 & bit != 0;
        self.0 |= bit;
        was
    }

    /// Sets `node` in the mask.
    pub fn set(&mut self, node: NodeId) {
        self.0 |= 1 << node.index();
    }

    /// Whether `node` is set.
    pub fn contains(&self, node: NodeId) -> bool {
        node.is_some() && self.0 & (1 << node.index()) != 0
    }

    /// Whether no node is set.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// The number of nodes set.
    pub fn count(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// The lowest node set, if any.
    pub fn first(&self) -> Option<NodeId> {
        self.iter().next()
    }

    /// Iterates over the nodes set in the mask, in increasing order.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + Clone + use<> {
        let mask = self.0;
        (0..MAX_NUMNODES as u8).filter(move |i| mask & (1 << i) != 0).map(NodeId)
    }

    /// The union of `self` and `other`.
    pub fn union(&self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Removes every node from the mask.
    pub fn clear(&mut self) {
        self.0 = 0;
    }
}
