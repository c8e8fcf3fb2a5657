// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The memory block registry: the raw, uncoalesced list of firmware-reported
//! memory ranges and their owning nodes.
//!
//! Blocks are only ever appended during a discovery pass and bulk-reset when
//! a source is abandoned; the finished registry is what the address-to-node
//! hash is built from.

use crate::NodeId;
use crate::NR_NODE_MEMBLKS;
use phys_range::PhysRange;
use thiserror::Error;

/// One contiguous physical range reported as belonging to one node.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryBlock {
    /// The physical range.
    pub range: PhysRange,
    /// The owning node.
    pub node: NodeId,
    /// Whether the firmware marked the range hot-pluggable.
    pub hotplug: bool,
}

/// Error returned by [`MemblkRegistry::register`].
#[derive(Debug, Error)]
pub enum MemblkError {
    /// The registry is full.
    #[error("too many memory blocks, registry capacity is {NR_NODE_MEMBLKS}")]
    TooManyBlocks,
}

/// Bounded, append-only list of [`MemoryBlock`]s.
#[derive(Debug, Default)]
pub struct MemblkRegistry {
    blocks: Vec<MemoryBlock>,
}

impl MemblkRegistry {
    /// Returns an empty registry.
    pub fn new() -> Self {
        Self {
            blocks: Vec::with_capacity(NR_NODE_MEMBLKS),
        }
    }

    /// Appends a block, failing if the registry is at capacity.
    pub fn register(
        &mut self,
        node: NodeId,
        range: PhysRange,
        hotplug: bool,
    ) -> Result<(), MemblkError> {
        if self.blocks.len() >= NR_NODE_MEMBLKS {
            return Err(MemblkError::TooManyBlocks);
        }
        self.blocks.push(MemoryBlock {
            range,
            node,
            hotplug,
        });
        Ok(())
    }

    /// Widens the block at `index` to the bounding interval of its range and
    /// `range`. Used when a same-node overlap is merged instead of rejected.
    pub(crate) fn widen(&mut self, index: usize, range: &PhysRange) {
        let blk = &mut self.blocks[index];
        blk.range = blk.range.hull(range);
    }

    /// Returns the index of the first registered block whose range intersects
    /// `range`, or exactly matches it.
    ///
    /// Degenerate (empty) blocks are skipped entirely; a zero-length block
    /// claims no addresses and can never conflict.
    pub fn conflicting(&self, range: &PhysRange) -> Option<usize> {
        self.blocks.iter().position(|blk| {
            if blk.range.is_empty() {
                return false;
            }
            blk.range.overlaps(range) || blk.range == *range
        })
    }

    /// Whether `[start, end)` lies entirely within a block owned by `node`.
    pub fn covers(&self, range: &PhysRange, node: NodeId) -> bool {
        self.blocks
            .iter()
            .any(|blk| blk.node == node && blk.range.contains(range))
    }

    /// The registered blocks, in registration order.
    pub fn blocks(&self) -> &[MemoryBlock] {
        &self.blocks
    }

    /// The block at `index`.
    pub fn get(&self, index: usize) -> &MemoryBlock {
        &self.blocks[index]
    }

    /// The number of registered blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Discards every block.
    pub fn reset(&mut self) {
        self.blocks.clear();
    }
}
