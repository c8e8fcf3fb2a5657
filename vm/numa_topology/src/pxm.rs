// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Proximity domain to dense node id allocation.
//!
//! Firmware identifies nodes by arbitrary small integers (proximity domains,
//! "PXM"). The first time a PXM is seen it is assigned the next free dense
//! node id, preferring to reuse the PXM value itself as the slot index so
//! small well-behaved systems keep stable, intuitive ids.

use crate::NodeId;
use crate::MAX_NUMNODES;

#[derive(Copy, Clone, Debug)]
struct Entry {
    pxm: u32,
    node: NodeId,
}

/// The PXM to node id map.
#[derive(Debug)]
pub(crate) struct PxmMap {
    entries: [Entry; MAX_NUMNODES],
    nodes_found: usize,
    /// Latch so "too many proximity domains" is warned exactly once per
    /// discovery pass.
    overflow_warned: bool,
}

impl PxmMap {
    pub fn new() -> Self {
        Self {
            entries: [Entry {
                pxm: 0,
                node: NodeId::NONE,
            }; MAX_NUMNODES],
            nodes_found: 0,
            overflow_warned: false,
        }
    }

    fn slot_matches(&self, idx: usize, pxm: u32) -> bool {
        self.entries[idx].pxm == pxm && self.entries[idx].node.is_some()
    }

    /// The node already allocated for `pxm`, if any.
    pub fn node_of(&self, pxm: u32) -> NodeId {
        if (pxm as usize) < MAX_NUMNODES && self.slot_matches(pxm as usize, pxm) {
            return self.entries[pxm as usize].node;
        }
        for idx in 0..MAX_NUMNODES {
            if self.slot_matches(idx, pxm) {
                return self.entries[idx].node;
            }
        }
        NodeId::NONE
    }

    /// The PXM that mapped to `node`, for reverse (node -> locality) lookups.
    /// Unknown nodes report PXM 0.
    pub fn pxm_of(&self, node: NodeId) -> u32 {
        let idx = node.index();
        if self.entries[idx].node == node {
            return self.entries[idx].pxm;
        }
        for entry in &self.entries {
            if entry.node == node {
                return entry.pxm;
            }
        }
        0
    }

    /// Resolves `pxm` to a dense node id, allocating one on first sight.
    ///
    /// Returns [`NodeId::NONE`] when every slot is taken; the caller must
    /// treat that as fatal for the record being processed. The capacity
    /// warning is emitted only once.
    pub fn resolve(&mut self, pxm: u32) -> NodeId {
        let idx = if (pxm as usize) < MAX_NUMNODES {
            if self.slot_matches(pxm as usize, pxm) {
                return self.entries[pxm as usize].node;
            }
            if self.entries[pxm as usize].node == NodeId::NONE {
                // Keep pxm2node indexed by PXM when possible.
                Some(pxm as usize)
            } else {
                None
            }
        } else {
            None
        };

        let idx = idx.or_else(|| (0..MAX_NUMNODES).find(|&i| self.entries[i].node == NodeId::NONE));

        let Some(idx) = idx else {
            if !self.overflow_warned {
                tracing::warn!(pxm, "too many proximity domains");
                self.overflow_warned = true;
            }
            return NodeId::NONE;
        };

        let Some(node) = NodeId::new(self.nodes_found) else {
            return NodeId::NONE;
        };
        self.nodes_found += 1;
        self.entries[idx] = Entry { pxm, node };
        node
    }

    /// Forgets every allocation and re-arms the overflow warning.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
