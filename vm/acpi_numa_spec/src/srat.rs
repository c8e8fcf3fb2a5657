// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! SRAT (Static Resource Affinity Table) wire format, revision 3.
//!
//! The SRAT associates processors (by APIC/x2APIC id or, on ARM, by ACPI
//! processor uid) and memory ranges with proximity domains.

#[cfg(feature = "alloc")]
pub use self::alloc_parse::*;

use crate::packed_nums::*;
use crate::ParseError;
use crate::SubtableHeader;
use core::mem::size_of;
use static_assertions::const_assert_eq;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Ref;
use zerocopy::Unaligned;

pub const SRAT_REVISION: u8 = 3;

/// The fixed portion of the SRAT following the standard ACPI header.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct SratHeader {
    pub rsvd1: u32_ne,
    pub rsvd2: u64_ne,
}

const_assert_eq!(size_of::<SratHeader>(), 12);

impl SratHeader {
    pub fn new() -> SratHeader {
        SratHeader {
            rsvd1: 1.into(),
            rsvd2: 0.into(),
        }
    }
}

impl Default for SratHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// SRAT sub-table record types.
#[repr(transparent)]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned,
)]
pub struct SratType(pub u8);

impl SratType {
    pub const APIC: Self = Self(0);
    pub const MEMORY: Self = Self(1);
    pub const X2APIC: Self = Self(2);
    pub const GICC: Self = Self(3);
}

pub const SRAT_CPU_ENABLED: u32 = 1 << 0;

/// Processor local APIC affinity record.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct SratApic {
    pub typ: SratType,
    pub length: u8,
    pub proximity_domain_byte1: u8,
    pub apic_id: u8,
    pub flags: u32_ne,
    pub local_sapic_eid: u8,
    pub proximity_domain_byte2: u8,
    pub proximity_domain_byte3: u8,
    pub proximity_domain_byte4: u8,
    pub clock_domain: u32_ne,
}

const_assert_eq!(size_of::<SratApic>(), 16);

impl SratApic {
    pub fn new(apic_id: u8, proximity_domain: u32) -> Self {
        let pxm = proximity_domain.to_le_bytes();
        Self {
            typ: SratType::APIC,
            length: size_of::<Self>() as u8,
            proximity_domain_byte1: pxm[0],
            apic_id,
            flags: SRAT_CPU_ENABLED.into(),
            local_sapic_eid: 0,
            proximity_domain_byte2: pxm[1],
            proximity_domain_byte3: pxm[2],
            proximity_domain_byte4: pxm[3],
            clock_domain: 0.into(),
        }
    }

    /// The proximity domain, reassembled from its scattered bytes.
    ///
    /// Only the low byte is architecturally valid before SRAT revision 2;
    /// the caller masks accordingly.
    pub fn proximity_domain(&self) -> u32 {
        u32::from_le_bytes([
            self.proximity_domain_byte1,
            self.proximity_domain_byte2,
            self.proximity_domain_byte3,
            self.proximity_domain_byte4,
        ])
    }

    pub fn enabled(&self) -> bool {
        self.flags.get() & SRAT_CPU_ENABLED != 0
    }
}

/// Processor x2APIC affinity record.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct SratX2Apic {
    pub typ: SratType,
    pub length: u8,
    pub reserved: u16_ne,
    pub proximity_domain: u32_ne,
    pub x2_apic_id: u32_ne,
    pub flags: u32_ne,
    pub clock_domain: u32_ne,
    pub reserved2: u32_ne,
}

const_assert_eq!(size_of::<SratX2Apic>(), 24);

impl SratX2Apic {
    pub fn new(x2_apic_id: u32, proximity_domain: u32) -> Self {
        Self {
            typ: SratType::X2APIC,
            length: size_of::<Self>() as u8,
            reserved: 0.into(),
            proximity_domain: proximity_domain.into(),
            x2_apic_id: x2_apic_id.into(),
            flags: SRAT_CPU_ENABLED.into(),
            clock_domain: 0.into(),
            reserved2: 0.into(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.flags.get() & SRAT_CPU_ENABLED != 0
    }
}

/// GIC CPU interface affinity record (ARM).
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct SratGicc {
    pub typ: SratType,
    pub length: u8,
    pub proximity_domain: u32_ne,
    pub acpi_processor_uid: u32_ne,
    pub flags: u32_ne,
    pub clock_domain: u32_ne,
}

const_assert_eq!(size_of::<SratGicc>(), 18);

impl SratGicc {
    pub fn new(acpi_processor_uid: u32, proximity_domain: u32) -> Self {
        Self {
            typ: SratType::GICC,
            length: size_of::<Self>() as u8,
            proximity_domain: proximity_domain.into(),
            acpi_processor_uid: acpi_processor_uid.into(),
            flags: SRAT_CPU_ENABLED.into(),
            clock_domain: 0.into(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.flags.get() & SRAT_CPU_ENABLED != 0
    }
}

pub const SRAT_MEM_ENABLED: u32 = 1 << 0;
pub const SRAT_MEM_HOT_PLUGGABLE: u32 = 1 << 1;
pub const SRAT_MEM_NON_VOLATILE: u32 = 1 << 2;

/// Memory affinity record.
#[repr(C)]
#[derive(Copy, Clone, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct SratMemory {
    pub typ: SratType,
    pub length: u8,
    pub proximity_domain: u32_ne,
    pub rsvd1: u16_ne,
    pub low_address: u32_ne,
    pub high_address: u32_ne,
    pub low_length: u32_ne,
    pub high_length: u32_ne,
    pub rsvd2: u32_ne,
    pub flags: u32_ne,
    pub rsvd3: u64_ne,
}

const_assert_eq!(size_of::<SratMemory>(), 40);

impl SratMemory {
    pub fn new(addr: u64, len: u64, proximity_domain: u32) -> Self {
        Self {
            typ: SratType::MEMORY,
            length: size_of::<Self>() as u8,
            proximity_domain: proximity_domain.into(),
            rsvd1: 0.into(),
            low_address: (addr as u32).into(),
            high_address: ((addr >> 32) as u32).into(),
            low_length: (len as u32).into(),
            high_length: ((len >> 32) as u32).into(),
            rsvd2: 0.into(),
            flags: SRAT_MEM_ENABLED.into(),
            rsvd3: 0.into(),
        }
    }

    /// Marks the record as describing a hot-pluggable range.
    pub fn hotplug(mut self) -> Self {
        self.flags = (self.flags.get() | SRAT_MEM_HOT_PLUGGABLE).into();
        self
    }

    pub fn base_address(&self) -> u64 {
        (self.high_address.get() as u64) << 32 | self.low_address.get() as u64
    }

    pub fn byte_length(&self) -> u64 {
        (self.high_length.get() as u64) << 32 | self.low_length.get() as u64
    }

    pub fn enabled(&self) -> bool {
        self.flags.get() & SRAT_MEM_ENABLED != 0
    }

    pub fn hot_pluggable(&self) -> bool {
        self.flags.get() & SRAT_MEM_HOT_PLUGGABLE != 0
    }

    pub fn non_volatile(&self) -> bool {
        self.flags.get() & SRAT_MEM_NON_VOLATILE != 0
    }
}

impl core::fmt::Debug for SratMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SratMemory")
            .field("typ", &self.typ)
            .field("proximity_domain", &self.proximity_domain.get())
            .field("base_address", &self.base_address())
            .field("byte_length", &self.byte_length())
            .field("flags", &self.flags.get())
            .finish()
    }
}

/// Typed SRAT sub-table records handed to the [`parse_srat`] callback.
#[derive(Debug)]
pub enum SratRecord<'a> {
    Apic(&'a SratApic),
    X2Apic(&'a SratX2Apic),
    Gicc(&'a SratGicc),
    Memory(&'a SratMemory),
}

/// Walks `raw_srat`, invoking `on_record` for every affinity record.
///
/// Sub-table types this module does not know about are skipped using their
/// generic length field; a record that is truncated or whose length field
/// cannot be trusted terminates the walk with an error. Returns the table
/// revision, which governs how wide the proximity domain fields are.
pub fn parse_srat<'a>(
    raw_srat: &'a [u8],
    mut on_record: impl FnMut(SratRecord<'a>),
) -> Result<u8, ParseError> {
    let (acpi_header, buf) = crate::parse_header(raw_srat, *b"SRAT")?;
    let (_srat_header, mut buf) =
        Ref::<_, SratHeader>::from_prefix(buf).map_err(|_| ParseError::MissingFixedHeader)?;

    while !buf.is_empty() {
        let offset = raw_srat.len() - buf.len();
        let typ = buf[0];
        let bad = || ParseError::BadRecord { typ, offset };

        buf = match SratType(typ) {
            SratType::APIC => {
                let (apic, rest) = Ref::<_, SratApic>::from_prefix(buf).map_err(|_| bad())?;
                on_record(SratRecord::Apic(Ref::into_ref(apic)));
                rest
            }
            SratType::X2APIC => {
                let (x2apic, rest) = Ref::<_, SratX2Apic>::from_prefix(buf).map_err(|_| bad())?;
                on_record(SratRecord::X2Apic(Ref::into_ref(x2apic)));
                rest
            }
            SratType::GICC => {
                let (gicc, rest) = Ref::<_, SratGicc>::from_prefix(buf).map_err(|_| bad())?;
                on_record(SratRecord::Gicc(Ref::into_ref(gicc)));
                rest
            }
            SratType::MEMORY => {
                let (mem, rest) = Ref::<_, SratMemory>::from_prefix(buf).map_err(|_| bad())?;
                on_record(SratRecord::Memory(Ref::into_ref(mem)));
                rest
            }
            _ => {
                // Later SRAT revisions define further affinity record types;
                // skip them by their generic header.
                let (sub, _) = Ref::<_, SubtableHeader>::from_prefix(buf).map_err(|_| bad())?;
                let len = sub.length as usize;
                if len < size_of::<SubtableHeader>() || len > buf.len() {
                    return Err(bad());
                }
                &buf[len..]
            }
        }
    }

    Ok(acpi_header.revision)
}

#[cfg(feature = "alloc")]
mod alloc_parse {
    use super::*;
    use alloc::vec::Vec;

    /// All affinity records of a SRAT, collected into vectors.
    #[derive(Debug)]
    pub struct OwnedSrat {
        pub revision: u8,
        pub apics: Vec<SratApic>,
        pub x2apics: Vec<SratX2Apic>,
        pub giccs: Vec<SratGicc>,
        pub memory: Vec<SratMemory>,
    }

    impl OwnedSrat {
        pub fn new(raw_srat: &[u8]) -> Result<OwnedSrat, ParseError> {
            let mut apics = Vec::new();
            let mut x2apics = Vec::new();
            let mut giccs = Vec::new();
            let mut memory = Vec::new();
            let revision = parse_srat(raw_srat, |record| match record {
                SratRecord::Apic(v) => apics.push(*v),
                SratRecord::X2Apic(v) => x2apics.push(*v),
                SratRecord::Gicc(v) => giccs.push(*v),
                SratRecord::Memory(v) => memory.push(*v),
            })?;

            Ok(OwnedSrat {
                revision,
                apics,
                x2apics,
                giccs,
                memory,
            })
        }
    }
}
