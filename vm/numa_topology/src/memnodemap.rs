// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The O(1) physical-address-to-node lookup table.
//!
//! The table is indexed by packed address index (pdx) shifted right by a
//! per-boot granularity. The shift is extracted from the block list itself:
//! the lowest set bit across every block's packed start address is the
//! coarsest granularity at which no two block starts land in the same slot.
//! Coarser shift means a smaller table; the population pass then proves no
//! two *different* nodes collide within a slot.

use crate::memblk::MemblkRegistry;
use crate::NodeId;
use crate::MAX_HASH_SHIFT;
use thiserror::Error;

/// Physical address to packed index compression.
///
/// The platform may remap physical addresses into a denser "pdx" space that
/// elides large known-empty gaps, shrinking the lookup table. The transform
/// must be monotonic over the addresses covered by registered memory.
pub trait PdxCompressor {
    /// Packs a physical byte address.
    fn to_pdx(&self, addr: u64) -> u64;
    /// Unpacks a packed index back to a physical byte address.
    fn from_pdx(&self, pdx: u64) -> u64;
}

/// The identity transform, for platforms without address-space holes worth
/// compressing.
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityPdx;

impl PdxCompressor for IdentityPdx {
    fn to_pdx(&self, addr: u64) -> u64 {
        addr
    }

    fn from_pdx(&self, pdx: u64) -> u64 {
        pdx
    }
}

/// Largest table the builder will attempt. A sane shift keeps real tables
/// tiny; hitting this means the firmware block layout defeated the shift
/// extraction, which is treated like any other build failure.
const MAX_TABLE_ENTRIES: u64 = 1 << 24;

/// Error raised while building the lookup table.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemNodeMapError {
    /// Two blocks owned by different nodes map into the same table slot.
    #[error("hash slot {slot} claimed by node {existing} and node {node}")]
    Collision {
        /// The contested slot index.
        slot: u64,
        /// The node already occupying the slot.
        existing: NodeId,
        /// The node attempting to claim it.
        node: NodeId,
    },
    /// The extracted shift would require an unreasonably large table.
    #[error("lookup table would need {entries} entries")]
    TableTooLarge {
        /// The required entry count.
        entries: u64,
    },
}

/// The built address-to-node map.
#[derive(Debug, Clone)]
pub struct MemNodeMap {
    shift: u32,
    map: Vec<NodeId>,
}

/// The coarsest shift that keeps every usable block's packed start in a
/// distinct-enough slot: the lowest set bit of the OR of all packed starts.
///
/// With zero or one usable block there is nothing to distinguish, so the
/// maximal shift is used and the whole address space shares one slot.
pub(crate) fn extract_shift(
    blocks: &MemblkRegistry,
    compressor: &impl PdxCompressor,
) -> u32 {
    let mut bits = 0u64;
    let mut usable = 0usize;
    for blk in blocks.blocks() {
        if blk.range.is_empty() {
            continue;
        }
        bits |= compressor.to_pdx(blk.range.start());
        usable += 1;
    }
    if usable <= 1 {
        return MAX_HASH_SHIFT;
    }
    bits.trailing_zeros().min(MAX_HASH_SHIFT)
}

impl MemNodeMap {
    /// A single-slot map sending every address to `node`.
    pub(crate) fn trivial(node: NodeId) -> Self {
        Self {
            shift: MAX_HASH_SHIFT,
            map: vec![node],
        }
    }

    /// Builds the table from the finished block list at granularity `shift`.
    ///
    /// Fails when two blocks owned by *different* nodes land in the same
    /// slot. Same-node overlap at slot granularity is benign and the slot is
    /// simply kept.
    pub(crate) fn populate(
        blocks: &MemblkRegistry,
        shift: u32,
        compressor: &impl PdxCompressor,
    ) -> Result<Self, MemNodeMapError> {
        let entries = blocks
            .blocks()
            .iter()
            .filter(|blk| !blk.range.is_empty())
            .map(|blk| (compressor.to_pdx(blk.range.end() - 1) >> shift) + 1)
            .max()
            .unwrap_or(1);

        if entries > MAX_TABLE_ENTRIES {
            return Err(MemNodeMapError::TableTooLarge { entries });
        }

        let mut map = vec![NodeId::NONE; entries as usize];
        for blk in blocks.blocks() {
            if blk.range.is_empty() {
                continue;
            }
            let first = compressor.to_pdx(blk.range.start()) >> shift;
            let last = compressor.to_pdx(blk.range.end() - 1) >> shift;
            for slot in first..=last {
                let entry = &mut map[slot as usize];
                if entry.is_some() && *entry != blk.node {
                    return Err(MemNodeMapError::Collision {
                        slot,
                        existing: *entry,
                        node: blk.node,
                    });
                }
                *entry = blk.node;
            }
        }
        Ok(Self { shift, map })
    }

    /// The node owning physical address `addr`.
    ///
    /// Never panics: addresses beyond the table report [`NodeId::NONE`].
    pub fn node_at(&self, addr: u64, compressor: &impl PdxCompressor) -> NodeId {
        let slot = compressor.to_pdx(addr) >> self.shift;
        self.map
            .get(slot as usize)
            .copied()
            .unwrap_or(NodeId::NONE)
    }

    /// The granularity the table was built at.
    pub fn shift(&self) -> u32 {
        self.shift
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phys_range::PhysRange;

    fn node(i: usize) -> NodeId {
        NodeId::new(i).unwrap()
    }

    fn registry(blocks: &[(u64, u64, usize)]) -> MemblkRegistry {
        let mut reg = MemblkRegistry::new();
        for &(start, end, nid) in blocks {
            reg.register(node(nid), PhysRange::new(start..end), false)
                .unwrap();
        }
        reg
    }

    #[test]
    fn shift_is_lowest_set_bit_of_starts() {
        let reg = registry(&[
            (0x0000_0000, 0x4000_0000, 0),
            (0x4000_0000, 0x8000_0000, 1),
        ]);
        // Starts 0x0 and 0x4000_0000 share 30 low-order zero bits.
        assert_eq!(extract_shift(&reg, &IdentityPdx), 30);

        let reg = registry(&[(0x1000, 0x2000, 0), (0x6000, 0x7000, 1)]);
        assert_eq!(extract_shift(&reg, &IdentityPdx), 12);
    }

    #[test]
    fn degenerate_and_singleton_blocks_force_max_shift() {
        let reg = registry(&[]);
        assert_eq!(extract_shift(&reg, &IdentityPdx), MAX_HASH_SHIFT);

        let reg = registry(&[(0x1000, 0x9000, 0)]);
        assert_eq!(extract_shift(&reg, &IdentityPdx), MAX_HASH_SHIFT);

        // An empty block does not count as usable.
        let reg = registry(&[(0x1000, 0x9000, 0), (0x4000, 0x4000, 1)]);
        assert_eq!(extract_shift(&reg, &IdentityPdx), MAX_HASH_SHIFT);
    }

    #[test]
    fn populate_and_lookup() {
        let reg = registry(&[
            (0x0000_0000, 0x4000_0000, 0),
            (0x4000_0000, 0x8000_0000, 1),
        ]);
        let shift = extract_shift(&reg, &IdentityPdx);
        let map = MemNodeMap::populate(&reg, shift, &IdentityPdx).unwrap();
        assert_eq!(map.node_at(0x0, &IdentityPdx), node(0));
        assert_eq!(map.node_at(0x3fff_ffff, &IdentityPdx), node(0));
        assert_eq!(map.node_at(0x4000_0000, &IdentityPdx), node(1));
        assert_eq!(map.node_at(0x7fff_ffff, &IdentityPdx), node(1));
        // Beyond the table is unknown, not a panic.
        assert_eq!(map.node_at(0x1_0000_0000, &IdentityPdx), NodeId::NONE);
    }

    #[test]
    fn different_node_collision_is_fatal() {
        // Both blocks start in the same 1 MiB slot but belong to
        // different nodes.
        let reg = registry(&[(0x0, 0x8_0000, 0), (0x8_0000, 0x10_0000, 1)]);
        // Force a shift coarser than the block boundary.
        let err = MemNodeMap::populate(&reg, 20, &IdentityPdx).unwrap_err();
        assert!(matches!(err, MemNodeMapError::Collision { slot: 0, .. }));
    }

    #[test]
    fn same_node_overlap_is_benign() {
        let mut reg = registry(&[(0x1000, 0x3000, 2)]);
        reg.register(node(2), PhysRange::new(0x2000..0x4000), false)
            .unwrap();
        let map = MemNodeMap::populate(&reg, 12, &IdentityPdx).unwrap();
        assert_eq!(map.node_at(0x2800, &IdentityPdx), node(2));
    }

    #[test]
    fn oversized_table_rejected() {
        let reg = registry(&[(0x0, 0x1000, 0), (0x1000_0000_0000, 0x1000_0000_1000, 1)]);
        let err = MemNodeMap::populate(&reg, 12, &IdentityPdx).unwrap_err();
        assert!(matches!(err, MemNodeMapError::TableTooLarge { .. }));
    }

    struct HalvingPdx;

    impl PdxCompressor for HalvingPdx {
        fn to_pdx(&self, addr: u64) -> u64 {
            addr / 2
        }

        fn from_pdx(&self, pdx: u64) -> u64 {
            pdx * 2
        }
    }

    #[test]
    fn compression_is_applied() {
        let reg = registry(&[(0x2000, 0x4000, 0), (0x4000, 0x6000, 1)]);
        // Packed starts are 0x1000 and 0x2000.
        assert_eq!(extract_shift(&reg, &HalvingPdx), 12);
        let map = MemNodeMap::populate(&reg, 12, &HalvingPdx).unwrap();
        assert_eq!(map.node_at(0x3fff, &HalvingPdx), node(0));
        assert_eq!(map.node_at(0x4000, &HalvingPdx), node(1));
    }
}
