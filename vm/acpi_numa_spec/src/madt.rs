// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The subset of the MADT (Multiple APIC Description Table) that NUMA
//! discovery needs: the records associating an ACPI processor uid with a
//! hardware CPU id (local APIC id on x86, MPIDR affinity bits on ARM).

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

pub const MADT_REVISION: u8 = 5;

/// The fixed portion of the MADT following the standard ACPI header.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct MadtHeader {
    pub local_interrupt_controller_address: u32_ne,
    pub flags: u32_ne,
}

const_assert_eq!(size_of::<MadtHeader>(), 8);

impl MadtHeader {
    pub fn new() -> Self {
        Self {
            local_interrupt_controller_address: 0.into(),
            flags: 0.into(),
        }
    }
}

impl Default for MadtHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// MADT interrupt controller structure types.
#[repr(transparent)]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned,
)]
pub struct MadtType(pub u8);

impl MadtType {
    pub const LOCAL_APIC: Self = Self(0);
    pub const GICC: Self = Self(0xb);
}

pub const MADT_CPU_ENABLED: u32 = 1 << 0;

/// Processor local APIC record.
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct MadtLocalApic {
    pub typ: MadtType,
    pub length: u8,
    pub acpi_processor_uid: u8,
    pub apic_id: u8,
    pub flags: u32_ne,
}

const_assert_eq!(size_of::<MadtLocalApic>(), 8);

impl MadtLocalApic {
    pub fn new(acpi_processor_uid: u8, apic_id: u8) -> Self {
        Self {
            typ: MadtType::LOCAL_APIC,
            length: size_of::<Self>() as u8,
            acpi_processor_uid,
            apic_id,
            flags: MADT_CPU_ENABLED.into(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.flags.get() & MADT_CPU_ENABLED != 0
    }
}

/// GIC CPU interface record (ARM).
#[repr(C)]
#[derive(Copy, Clone, Debug, IntoBytes, Immutable, KnownLayout, FromBytes, Unaligned)]
pub struct MadtGicc {
    pub typ: MadtType,
    pub length: u8,
    pub reserved: u16_ne,
    pub cpu_interface_number: u32_ne,
    pub acpi_processor_uid: u32_ne,
    pub flags: u32_ne,
    pub parking_protocol_version: u32_ne,
    pub performance_interrupt_gsiv: u32_ne,
    pub parked_address: u64_ne,
    pub physical_base_address: u64_ne,
    pub gicv: u64_ne,
    pub gich: u64_ne,
    pub vgic_maintenance_interrupt: u32_ne,
    pub gicr_base_address: u64_ne,
    pub mpidr: u64_ne,
    pub processor_power_efficiency_class: u8,
    pub reserved2: u8,
    pub spe_overflow_interrupt: u16_ne,
}

const_assert_eq!(size_of::<MadtGicc>(), 80);

impl MadtGicc {
    pub fn new(acpi_processor_uid: u32, mpidr: u64) -> Self {
        Self {
            typ: MadtType::GICC,
            length: size_of::<Self>() as u8,
            reserved: 0.into(),
            cpu_interface_number: 0.into(),
            acpi_processor_uid: acpi_processor_uid.into(),
            flags: MADT_CPU_ENABLED.into(),
            parking_protocol_version: 0.into(),
            performance_interrupt_gsiv: 0.into(),
            parked_address: 0.into(),
            physical_base_address: 0.into(),
            gicv: 0.into(),
            gich: 0.into(),
            vgic_maintenance_interrupt: 0.into(),
            gicr_base_address: 0.into(),
            mpidr: mpidr.into(),
            processor_power_efficiency_class: 0,
            reserved2: 0,
            spe_overflow_interrupt: 0.into(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.flags.get() & MADT_CPU_ENABLED != 0
    }
}

/// Typed MADT records handed to the [`parse_madt`] callback.
///
/// The MADT carries many record types irrelevant to NUMA discovery
/// (IO-APICs, interrupt overrides, ...); those are skipped silently.
#[derive(Debug)]
pub enum MadtRecord<'a> {
    LocalApic(&'a MadtLocalApic),
    Gicc(&'a MadtGicc),
}

/// Walks `raw_madt`, invoking `on_record` for every processor record.
pub fn parse_madt<'a>(
    raw_madt: &'a [u8],
    mut on_record: impl FnMut(MadtRecord<'a>),
) -> Result<(), ParseError> {
    let (_acpi_header, buf) = crate::parse_header(raw_madt, *b"APIC")?;
    let (_madt_header, mut buf) =
        Ref::<_, MadtHeader>::from_prefix(buf).map_err(|_| ParseError::MissingFixedHeader)?;

    while !buf.is_empty() {
        let offset = raw_madt.len() - buf.len();
        let typ = buf[0];
        let bad = || ParseError::BadRecord { typ, offset };

        buf = match MadtType(typ) {
            MadtType::LOCAL_APIC => {
                let (apic, rest) = Ref::<_, MadtLocalApic>::from_prefix(buf).map_err(|_| bad())?;
                on_record(MadtRecord::LocalApic(Ref::into_ref(apic)));
                rest
            }
            MadtType::GICC => {
                let (gicc, rest) = Ref::<_, MadtGicc>::from_prefix(buf).map_err(|_| bad())?;
                on_record(MadtRecord::Gicc(Ref::into_ref(gicc)));
                rest
            }
            _ => {
                let (sub, _) = Ref::<_, SubtableHeader>::from_prefix(buf).map_err(|_| bad())?;
                let len = sub.length as usize;
                if len < size_of::<SubtableHeader>() || len > buf.len() {
                    return Err(bad());
                }
                &buf[len..]
            }
        }
    }

    Ok(())
}
