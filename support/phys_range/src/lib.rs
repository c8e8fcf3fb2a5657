// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The [`PhysRange`] type, a half-open byte range of physical address space,
//! plus the small set of range algorithms used by NUMA topology discovery.
//!
//! Unlike a page-granular memory map entry, firmware affinity records carry
//! arbitrary byte addresses, so no alignment is enforced here.

#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![no_std]

use core::ops::Range;

/// A half-open `[start, end)` range of physical address space.
///
/// A range with `start == end` is empty ("degenerate"); such ranges are legal
/// and compare like any other, but contain no addresses and overlap nothing.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhysRange {
    start: u64,
    end: u64,
}

impl core::fmt::Display for PhysRange {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}-{:#x}", self.start, self.end)
    }
}

/// Error returned by [`PhysRange::try_new`].
#[derive(Debug, thiserror::Error)]
#[error("invalid physical range: {start:#x}-{end:#x}")]
pub struct InvalidPhysRange {
    start: u64,
    end: u64,
}

impl PhysRange {
    /// The empty range at address zero.
    pub const EMPTY: Self = Self { start: 0, end: 0 };

    /// Returns a new range for the given address range.
    ///
    /// Panics if the start is after the end.
    #[track_caller]
    pub const fn new(range: Range<u64>) -> Self {
        assert!(range.start <= range.end);
        Self {
            start: range.start,
            end: range.end,
        }
    }

    /// Returns a new range, or an error if the start is after the end.
    pub const fn try_new(range: Range<u64>) -> Result<Self, InvalidPhysRange> {
        if range.start > range.end {
            return Err(InvalidPhysRange {
                start: range.start,
                end: range.end,
            });
        }
        Ok(Self {
            start: range.start,
            end: range.end,
        })
    }

    /// Returns the range starting at `start`, `len` bytes long, saturating at
    /// the top of the address space.
    pub const fn from_start_len(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    /// The first address in the range.
    pub const fn start(&self) -> u64 {
        self.start
    }

    /// One past the last address in the range.
    pub const fn end(&self) -> u64 {
        self.end
    }

    /// The length of the range in bytes.
    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the range contains no addresses.
    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Whether the byte at `addr` is within the range.
    pub const fn contains_addr(&self, addr: u64) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Whether `other` is entirely within `self`.
    pub const fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether `self` and `other` share at least one address.
    ///
    /// Empty ranges overlap nothing, including themselves.
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The addresses in both `self` and `other`, or the empty range.
    pub fn intersection(&self, other: &Self) -> Self {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        if start <= end {
            Self { start, end }
        } else {
            Self::EMPTY
        }
    }

    /// The bounding interval of `self` and `other`: minimum of the starts to
    /// maximum of the ends.
    ///
    /// This is deliberately not an exact union; any gap between disjoint
    /// inputs is swallowed. Node span coalescing relies on exactly this
    /// cheap approximation.
    pub fn hull(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Clamps the range to `bounds`, returning the empty range positioned at
    /// the nearer bound when there is no intersection.
    pub fn clamp_to(&self, bounds: &Self) -> Self {
        let mut start = self.start;
        let mut end = self.end;
        if start < bounds.start {
            start = bounds.start;
            if end < start {
                start = end;
            }
        }
        if end > bounds.end {
            end = bounds.end;
            if start > end {
                start = end;
            }
        }
        Self { start, end }
    }
}

impl Default for PhysRange {
    /// Returns [`PhysRange::EMPTY`].
    fn default() -> Self {
        Self::EMPTY
    }
}

impl From<PhysRange> for Range<u64> {
    fn from(range: PhysRange) -> Self {
        range.start..range.end
    }
}

/// Removes every range in `claimed` from `range`, returning the leftover
/// portion if any address of `range` is claimed by nothing.
///
/// `claimed` may contain overlapping and unsorted entries; the subtraction
/// iterates until it no longer makes progress, mirroring how firmware node
/// spans (which are bounding boxes, not exact unions) must be peeled off a
/// RAM bank from both ends.
pub fn uncovered_portion(
    range: PhysRange,
    claimed: impl Iterator<Item = PhysRange> + Clone,
) -> Option<PhysRange> {
    if range.is_empty() {
        return None;
    }

    let mut start = range.start();
    let mut end = range.end();
    loop {
        let mut progressed = false;
        for span in claimed.clone() {
            if span.is_empty() || !(span.start() < end && start < span.end()) {
                continue;
            }
            if start >= span.start() && start < span.end() {
                start = span.end();
                progressed = true;
            }
            if end <= span.end() && end > span.start() {
                end = span.start();
                progressed = true;
            }
        }
        if !progressed || start >= end {
            break;
        }
    }

    if start < end {
        Some(PhysRange::new(start..end))
    } else {
        None
    }
}
