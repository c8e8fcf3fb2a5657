// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The node distance matrix.
//!
//! Distances are the ACPI/SLIT convention: 10 means local, larger means more
//! expensive, 0xff means unreachable. An entry never written by firmware
//! falls back to [`LOCAL_DISTANCE`]/[`REMOTE_DISTANCE`] based on node
//! equality, so queries are total whether or not a distance table was
//! provided.

use crate::NodeId;
use crate::LOCAL_DISTANCE;
use crate::MAX_NUMNODES;
use crate::NO_DISTANCE;
use crate::REMOTE_DISTANCE;
use thiserror::Error;

/// Error returned when recording an explicit firmware distance.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DistanceError {
    /// A node id does not fit the matrix.
    #[error("node id {0} out of range")]
    NodeOutOfRange(u32),
    /// The distance cannot be represented or is semantically impossible.
    #[error("invalid distance {distance} for nodes {from} -> {to}")]
    InvalidDistance {
        /// Source node.
        from: u32,
        /// Destination node.
        to: u32,
        /// The rejected distance value.
        distance: u32,
    },
}

/// Node-to-node relative access costs.
#[derive(Debug, Clone)]
pub struct DistanceMatrix {
    /// Row-major; 0 means "unset" (0-9 are architecturally undefined
    /// distance values, so 0 is free to repurpose).
    entries: Vec<u8>,
}

impl DistanceMatrix {
    /// Returns a matrix with no explicit entries.
    pub fn new() -> Self {
        Self {
            entries: vec![0; MAX_NUMNODES * MAX_NUMNODES],
        }
    }

    /// The distance from `a` to `b`.
    ///
    /// Total: invalid ids report [`NO_DISTANCE`], unset pairs report the
    /// local/remote default.
    pub fn get(&self, a: NodeId, b: NodeId) -> u8 {
        if !a.is_some() || !b.is_some() {
            return NO_DISTANCE;
        }
        match self.entries[a.index() * MAX_NUMNODES + b.index()] {
            0 => {
                if a == b {
                    LOCAL_DISTANCE
                } else {
                    REMOTE_DISTANCE
                }
            }
            d => d,
        }
    }

    /// Whether an explicit value has been recorded for `(a, b)`.
    pub fn is_set(&self, a: NodeId, b: NodeId) -> bool {
        self.entries[a.index() * MAX_NUMNODES + b.index()] != 0
    }

    /// Records the distance from `from` to `to`.
    ///
    /// Rejects ids outside the matrix, distances that do not fit the 8-bit
    /// cost encoding, sub-local distances, and a non-local diagonal. Never
    /// panics on firmware input.
    pub fn set(&mut self, from: u32, to: u32, distance: u32) -> Result<(), DistanceError> {
        let a = NodeId::new(from as usize).ok_or(DistanceError::NodeOutOfRange(from))?;
        let b = NodeId::new(to as usize).ok_or(DistanceError::NodeOutOfRange(to))?;

        let invalid = DistanceError::InvalidDistance { from, to, distance };
        if distance > NO_DISTANCE as u32 || (distance as u8) < LOCAL_DISTANCE {
            return Err(invalid);
        }
        if (from == to) != (distance == LOCAL_DISTANCE as u32) {
            return Err(invalid);
        }

        self.entries[a.index() * MAX_NUMNODES + b.index()] = distance as u8;
        Ok(())
    }

    /// Records the distance for `(to, from)` as well, unless an explicit
    /// value is already present for that direction.
    ///
    /// Device-tree distance maps commonly list each pair once; the reverse
    /// direction is assumed symmetric. An explicit entry always wins.
    pub fn set_symmetric(&mut self, from: u32, to: u32, distance: u32) -> Result<(), DistanceError> {
        self.set(from, to, distance)?;
        let a = NodeId::new(from as usize).unwrap();
        let b = NodeId::new(to as usize).unwrap();
        if !self.is_set(b, a) {
            self.entries[b.index() * MAX_NUMNODES + a.index()] = distance as u8;
        }
        Ok(())
    }

    /// Stores a raw, already-validated cost for `(a, b)`, mapping values the
    /// matrix cannot express to [`NO_DISTANCE`]. Used when adopting a SLIT
    /// wholesale.
    pub(crate) fn adopt_raw(&mut self, a: NodeId, b: NodeId, value: u8) {
        let value = if value == NO_DISTANCE || value < LOCAL_DISTANCE {
            // ACPI defines 0xff as unreachable and 0-9 as undefined.
            NO_DISTANCE
        } else {
            value
        };
        self.entries[a.index() * MAX_NUMNODES + b.index()] = value;
    }

    /// Forgets every explicit entry.
    pub fn reset(&mut self) {
        self.entries.fill(0);
    }
}

impl Default for DistanceMatrix {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(i: usize) -> NodeId {
        NodeId::new(i).unwrap()
    }

    #[test]
    fn defaults() {
        let m = DistanceMatrix::new();
        assert_eq!(m.get(node(0), node(0)), LOCAL_DISTANCE);
        assert_eq!(m.get(node(0), node(1)), REMOTE_DISTANCE);
        assert_eq!(m.get(NodeId::NONE, node(1)), NO_DISTANCE);
    }

    #[test]
    fn symmetric_fill_never_overwrites() {
        let mut m = DistanceMatrix::new();
        m.set(1, 0, 17).unwrap();
        // Symmetric fill for (0, 1) must not clobber the explicit (1, 0).
        m.set_symmetric(0, 1, 30).unwrap();
        assert_eq!(m.get(node(0), node(1)), 30);
        assert_eq!(m.get(node(1), node(0)), 17);

        // When only one direction was given, the reverse is mirrored.
        m.set_symmetric(2, 3, 40).unwrap();
        assert_eq!(m.get(node(3), node(2)), 40);
    }

    #[test]
    fn rejects_garbage() {
        let mut m = DistanceMatrix::new();
        assert!(matches!(
            m.set(0, 1000, 20),
            Err(DistanceError::NodeOutOfRange(1000))
        ));
        assert!(matches!(
            m.set(0, 1, 256),
            Err(DistanceError::InvalidDistance { .. })
        ));
        assert!(matches!(
            m.set(0, 1, 9),
            Err(DistanceError::InvalidDistance { .. })
        ));
        // Diagonal must be exactly local.
        assert!(m.set(2, 2, 20).is_err());
        assert!(m.set(2, 2, LOCAL_DISTANCE as u32).is_ok());
        // Off-diagonal must not claim to be local.
        assert!(m.set(0, 1, LOCAL_DISTANCE as u32).is_err());
    }

    #[test]
    fn reset_restores_defaults() {
        let mut m = DistanceMatrix::new();
        m.set(0, 1, 42).unwrap();
        m.reset();
        assert_eq!(m.get(node(0), node(1)), REMOTE_DISTANCE);
    }
}
