// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Wire formats and streaming parsers for the ACPI tables consumed by NUMA
//! topology discovery: SRAT (static resource affinity), SLIT (system locality
//! distance), and the subset of the MADT needed to associate processor uids
//! with hardware ids.
//!
//! Parsers hand typed sub-table records to the caller one at a time via
//! callbacks; policy (what a record means, when to give up) lives entirely in
//! the caller.

#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

pub mod madt;
pub mod slit;
pub mod srat;

#[allow(non_camel_case_types)]
mod packed_nums {
    pub type u16_ne = zerocopy::U16<zerocopy::NativeEndian>;
    pub type u32_ne = zerocopy::U32<zerocopy::NativeEndian>;
    pub type u64_ne = zerocopy::U64<zerocopy::NativeEndian>;
}

use self::packed_nums::*;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Ref;
use zerocopy::Unaligned;

/// The standard ACPI description header preceding every table.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct Header {
    pub signature: [u8; 4],
    pub length: u32_ne,
    pub revision: u8,
    pub checksum: u8,
    pub oem_id: [u8; 6],
    pub oem_tableid: [u8; 8],
    pub oem_revision: u32_ne,
    pub creator_id: u32_ne,
    pub creator_revision: u32_ne,
}

const_assert_eq!(size_of::<Header>(), 36);

impl Header {
    /// Builds a header for a `length`-byte table (header included) with the
    /// given signature and revision. The checksum is left at zero; consumers
    /// of these tables validate checksums before handing them over.
    pub fn new(signature: [u8; 4], revision: u8, length: usize) -> Self {
        Self {
            signature,
            length: (length as u32).into(),
            revision,
            checksum: 0,
            oem_id: *b"HVHVHV",
            oem_tableid: *b"HVNUMA  ",
            oem_revision: 1.into(),
            creator_id: 0.into(),
            creator_revision: 0.into(),
        }
    }
}

/// The common 2-byte header shared by every SRAT and MADT sub-table, used to
/// skip record types a walker does not care about.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct SubtableHeader {
    pub typ: u8,
    pub length: u8,
}

/// Error produced while walking a table's sub-table records.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The standard ACPI header could not be read.
    MissingAcpiHeader,
    /// The table signature did not match the expected one.
    InvalidSignature([u8; 4]),
    /// The length in the header disagrees with the buffer.
    MismatchedLength { in_header: usize, actual: usize },
    /// The table's fixed (post-header) portion could not be read.
    MissingFixedHeader,
    /// A sub-table record was truncated or its length field is nonsense.
    BadRecord { typ: u8, offset: usize },
}

impl core::fmt::Display for ParseError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::MissingAcpiHeader => write!(f, "could not read standard ACPI header"),
            Self::InvalidSignature(sig) => write!(f, "unexpected table signature {sig:?}"),
            Self::MismatchedLength { in_header, actual } => {
                write!(f, "mismatched len. in_header: {in_header}, actual {actual}")
            }
            Self::MissingFixedHeader => write!(f, "missing fixed table header"),
            Self::BadRecord { typ, offset } => {
                write!(f, "bad sub-table record type {typ} at offset {offset}")
            }
        }
    }
}

impl core::error::Error for ParseError {}

/// Validates the ACPI header of `raw` against `signature` and the buffer
/// length, returning the header and the sub-table area.
pub(crate) fn parse_header(
    raw: &[u8],
    signature: [u8; 4],
) -> Result<(&Header, &[u8]), ParseError> {
    let raw_len = raw.len();
    let (header, rest) =
        Ref::<_, Header>::from_prefix(raw).map_err(|_| ParseError::MissingAcpiHeader)?;
    let header = Ref::into_ref(header);

    if header.signature != signature {
        return Err(ParseError::InvalidSignature(header.signature));
    }

    if header.length.get() as usize != raw_len {
        return Err(ParseError::MismatchedLength {
            in_header: header.length.get() as usize,
            actual: raw_len,
        });
    }

    Ok((header, rest))
}
