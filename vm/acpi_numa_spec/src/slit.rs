// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! SLIT (System Locality Distance Information Table) wire format.
//!
//! The SLIT is a flat `n x n` byte matrix of relative access costs between
//! localities, preceded by the locality count.

use crate::packed_nums::*;
use crate::ParseError;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Ref;
use zerocopy::Unaligned;

pub const SLIT_REVISION: u8 = 1;

/// The fixed portion of the SLIT following the standard ACPI header.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct SlitHeader {
    pub locality_count: u64_ne,
}

const_assert_eq!(size_of::<SlitHeader>(), 8);

/// A borrowed view of a parsed SLIT.
#[derive(Debug, Clone, Copy)]
pub struct SlitView<'a> {
    locality_count: usize,
    entries: &'a [u8],
}

impl<'a> SlitView<'a> {
    /// The number of localities the matrix covers.
    pub fn locality_count(&self) -> usize {
        self.locality_count
    }

    /// The row-major `locality_count * locality_count` entry matrix.
    pub fn entries(&self) -> &'a [u8] {
        self.entries
    }

    /// The distance from locality `from` to locality `to`.
    ///
    /// Panics if either index is out of range.
    pub fn entry(&self, from: usize, to: usize) -> u8 {
        assert!(from < self.locality_count && to < self.locality_count);
        self.entries[from * self.locality_count + to]
    }
}

/// Parses `raw_slit`, validating that the entry matrix length matches the
/// advertised locality count.
pub fn parse_slit(raw_slit: &[u8]) -> Result<SlitView<'_>, ParseError> {
    let (_acpi_header, buf) = crate::parse_header(raw_slit, *b"SLIT")?;
    let (slit_header, entries) =
        Ref::<_, SlitHeader>::from_prefix(buf).map_err(|_| ParseError::MissingFixedHeader)?;

    let locality_count = slit_header.locality_count.get() as usize;
    let expected = locality_count
        .checked_mul(locality_count)
        .ok_or(ParseError::MissingFixedHeader)?;
    if entries.len() != expected {
        return Err(ParseError::MismatchedLength {
            in_header: expected,
            actual: entries.len(),
        });
    }

    Ok(SlitView {
        locality_count,
        entries,
    })
}

/// Builds a complete SLIT byte image from a row-major distance matrix, for
/// tests and for synthesizing tables handed to guests.
#[cfg(feature = "alloc")]
pub fn build_slit(locality_count: usize, entries: &[u8]) -> alloc::vec::Vec<u8> {
    use alloc::vec::Vec;

    assert_eq!(entries.len(), locality_count * locality_count);
    let total = size_of::<crate::Header>() + size_of::<SlitHeader>() + entries.len();
    let mut raw = Vec::with_capacity(total);
    raw.extend_from_slice(crate::Header::new(*b"SLIT", SLIT_REVISION, total).as_bytes());
    raw.extend_from_slice(
        SlitHeader {
            locality_count: (locality_count as u64).into(),
        }
        .as_bytes(),
    );
    raw.extend_from_slice(entries);
    raw
}
