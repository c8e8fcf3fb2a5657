// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-node coalesced spans and the "which nodes did the firmware mention"
//! masks.
//!
//! A node's span is the bounding interval of every memory block seen for it,
//! not an exact union: gaps between disjoint same-node blocks are implicitly
//! included. Downstream consumers (coverage validation, dummy init,
//! diagnostics) rely on this cheap form; the address hash is built from the
//! actual memory blocks instead, so the approximation never misattributes an
//! address.

use crate::NodeId;
use crate::NodeMask;
use crate::MAX_NUMNODES;
use phys_range::PhysRange;

/// Coalesced node spans plus the parsed-node masks.
#[derive(Debug)]
pub(crate) struct NodeSpans {
    spans: [PhysRange; MAX_NUMNODES],
    /// Nodes mentioned by a (non-hotplug) memory affinity record.
    pub memory_parsed: NodeMask,
    /// Nodes mentioned by a processor affinity record.
    pub processor_parsed: NodeMask,
}

impl NodeSpans {
    pub fn new() -> Self {
        Self {
            spans: [PhysRange::EMPTY; MAX_NUMNODES],
            memory_parsed: NodeMask::EMPTY,
            processor_parsed: NodeMask::EMPTY,
        }
    }

    /// The coalesced span of `node`.
    pub fn span(&self, node: NodeId) -> PhysRange {
        self.spans[node.index()]
    }

    /// Records `range` as belonging to `node`: on first sight the span is
    /// set, afterwards it is widened to the bounding interval.
    pub fn coalesce(&mut self, node: NodeId, range: PhysRange) {
        let slot = &mut self.spans[node.index()];
        if !self.memory_parsed.test_and_set(node) {
            *slot = range;
        } else {
            *slot = slot.hull(&range);
        }
    }

    /// Clamps every span to `bounds`, discarding any portion outside the
    /// detected RAM range.
    pub fn cutoff_all(&mut self, bounds: PhysRange) {
        for span in &mut self.spans {
            *span = span.clamp_to(&bounds);
        }
    }

    /// Every node mentioned by either kind of affinity record.
    pub fn all_parsed(&self) -> NodeMask {
        self.memory_parsed.union(self.processor_parsed)
    }

    /// Forgets everything.
    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
