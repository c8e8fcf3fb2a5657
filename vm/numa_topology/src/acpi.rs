// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The ACPI front-end: MADT + SRAT (+ optional SLIT) to discovery state.
//!
//! The MADT associates ACPI processor uids with hardware CPU ids (local APIC
//! id or MPIDR); the SRAT associates hardware ids and memory ranges with
//! proximity domains; the SLIT, when present and plausible, supplies the
//! distance matrix. Record-level inconsistencies mark the discovery failed
//! but do not stop the walk, so every problem in the tables is logged in one
//! pass.

use crate::discovery::Discovery;
use crate::discovery::NumaSource;
use crate::discovery::SourceError;
use crate::discovery::SourceKind;
use crate::LOCAL_DISTANCE;
use acpi_numa_spec::madt;
use acpi_numa_spec::madt::MadtRecord;
use acpi_numa_spec::slit;
use acpi_numa_spec::srat;
use acpi_numa_spec::srat::SratRecord;
use phys_range::PhysRange;

/// Affinity-relevant bits of an MPIDR: Aff3 plus Aff2..Aff0.
const MPIDR_HWID_MASK: u64 = 0xff00ffffff;

/// Placeholder MPIDR value firmware uses for absent processors.
const MPIDR_INVALID: u64 = !0;

/// Local APIC id value meaning "no APIC here".
const APIC_ID_INVALID: u8 = 0xff;

/// A NUMA description read from raw ACPI tables.
pub struct AcpiSource<'a> {
    madt: &'a [u8],
    srat: &'a [u8],
    slit: Option<&'a [u8]>,
}

impl<'a> AcpiSource<'a> {
    /// Returns a source over raw MADT and SRAT images, plus the SLIT when
    /// firmware provides one.
    pub fn new(madt: &'a [u8], srat: &'a [u8], slit: Option<&'a [u8]>) -> Self {
        Self { madt, srat, slit }
    }
}

impl NumaSource for AcpiSource<'_> {
    fn kind(&self) -> SourceKind {
        SourceKind::Acpi
    }

    fn probe(&self, state: &mut Discovery) -> Result<(), SourceError> {
        // Pass 1: MADT. Build the uid -> hardware id association the SRAT
        // GICC records are resolved through.
        let mut uid_to_mpidr: Vec<(u32, u64)> = Vec::new();
        madt::parse_madt(self.madt, |record| match record {
            MadtRecord::LocalApic(apic) => {
                if apic.enabled() && apic.apic_id == APIC_ID_INVALID {
                    tracing::warn!(
                        uid = apic.acpi_processor_uid,
                        "invalid local APIC id in MADT"
                    );
                    state.fail();
                }
            }
            MadtRecord::Gicc(gicc) => {
                if !gicc.enabled() {
                    return;
                }
                let mpidr = gicc.mpidr.get();
                if mpidr == MPIDR_INVALID {
                    tracing::warn!(
                        uid = gicc.acpi_processor_uid.get(),
                        "placeholder MPIDR in MADT"
                    );
                    state.fail();
                    return;
                }
                uid_to_mpidr.push((gicc.acpi_processor_uid.get(), mpidr & MPIDR_HWID_MASK));
            }
        })?;

        // Pass 2: SRAT affinity records.
        let revision = revision_hint(self.srat);
        srat::parse_srat(self.srat, |record| match record {
            SratRecord::Apic(apic) => {
                if !apic.enabled() {
                    return;
                }
                let mut pxm = apic.proximity_domain();
                if revision < 2 {
                    // Only the low proximity domain byte is valid before
                    // SRAT revision 2.
                    pxm &= 0xff;
                }
                let node = state.resolve_pxm(pxm);
                if !node.is_some() {
                    return;
                }
                state.record_cpu_affinity(apic.apic_id as u64, node);
            }
            SratRecord::X2Apic(x2apic) => {
                if !x2apic.enabled() {
                    return;
                }
                let node = state.resolve_pxm(x2apic.proximity_domain.get());
                if !node.is_some() {
                    return;
                }
                state.record_cpu_affinity(x2apic.x2_apic_id.get() as u64, node);
            }
            SratRecord::Gicc(gicc) => {
                if !gicc.enabled() {
                    return;
                }
                let uid = gicc.acpi_processor_uid.get();
                let Some(&(_, mpidr)) = uid_to_mpidr.iter().find(|&&(u, _)| u == uid) else {
                    tracing::warn!(uid, "SRAT GICC uid not present in MADT");
                    state.fail();
                    return;
                };
                let node = state.resolve_pxm(gicc.proximity_domain.get());
                if !node.is_some() {
                    return;
                }
                state.record_cpu_affinity(mpidr, node);
            }
            SratRecord::Memory(mem) => {
                if !mem.enabled() {
                    return;
                }
                let node = state.resolve_pxm(mem.proximity_domain.get());
                if !node.is_some() {
                    return;
                }
                let start = mem.base_address();
                let end = start.saturating_add(mem.byte_length());
                state.register_memory_affinity(
                    node,
                    PhysRange::new(start..end),
                    mem.hot_pluggable(),
                );
            }
        })?;

        // Pass 3: SLIT, only worth adopting if the rest held together.
        if let Some(raw_slit) = self.slit {
            if !state.failed() {
                adopt_slit(state, raw_slit);
            }
        }

        Ok(())
    }
}

// parse_srat reports the table revision only after the walk finishes, but
// the record callback needs it, so peek at the header up front.
fn revision_hint(raw_srat: &[u8]) -> u8 {
    // Revision byte of the standard ACPI header.
    raw_srat.get(8).copied().unwrap_or(0)
}

/// Validates and adopts a SLIT.
///
/// An implausible matrix (wrong diagonal, off-diagonal not greater than
/// local) is discarded with a warning; distance queries then fall back to the
/// local/remote defaults. A bad SLIT never fails NUMA discovery.
fn adopt_slit(state: &mut Discovery, raw_slit: &[u8]) {
    let view = match slit::parse_slit(raw_slit) {
        Ok(view) => view,
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn core::error::Error,
                "discarding malformed SLIT"
            );
            return;
        }
    };

    let n = view.locality_count();
    for from in 0..n {
        for to in 0..n {
            let d = view.entry(from, to);
            let plausible = if from == to {
                d == LOCAL_DISTANCE
            } else {
                d > LOCAL_DISTANCE
            };
            if !plausible {
                tracing::warn!(from, to, distance = d, "discarding implausible SLIT");
                return;
            }
        }
    }

    let nodes = state.spans.all_parsed();
    for a in nodes.iter() {
        for b in nodes.iter() {
            let pa = state.pxm.pxm_of(a) as usize;
            let pb = state.pxm.pxm_of(b) as usize;
            if pa >= n || pb >= n {
                // The SLIT does not cover this locality; leave the default.
                continue;
            }
            let d = view.entry(pa, pb);
            state.distance.adopt_raw(a, b, d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeId;
    use acpi_numa_spec::madt::MadtGicc;
    use acpi_numa_spec::madt::MadtLocalApic;
    use acpi_numa_spec::madt::MADT_REVISION;
    use acpi_numa_spec::srat::SratApic;
    use acpi_numa_spec::srat::SratMemory;
    use acpi_numa_spec::srat::SRAT_REVISION;
    use acpi_numa_spec::Header;
    use core::mem::size_of;
    use zerocopy::IntoBytes;

    fn table(signature: [u8; 4], revision: u8, fixed: &[u8], records: &[&[u8]]) -> Vec<u8> {
        let total = size_of::<Header>()
            + fixed.len()
            + records.iter().map(|r| r.len()).sum::<usize>();
        let mut raw = Vec::with_capacity(total);
        raw.extend_from_slice(Header::new(signature, revision, total).as_bytes());
        raw.extend_from_slice(fixed);
        for r in records {
            raw.extend_from_slice(r);
        }
        raw
    }

    fn madt(records: &[&[u8]]) -> Vec<u8> {
        table(
            *b"APIC",
            MADT_REVISION,
            madt::MadtHeader::new().as_bytes(),
            records,
        )
    }

    fn srat(records: &[&[u8]]) -> Vec<u8> {
        table(
            *b"SRAT",
            SRAT_REVISION,
            srat::SratHeader::new().as_bytes(),
            records,
        )
    }

    #[test]
    fn apic_and_memory_affinity() {
        let madt = madt(&[
            MadtLocalApic::new(0, 10).as_bytes(),
            MadtLocalApic::new(1, 11).as_bytes(),
        ]);
        let srat = srat(&[
            SratApic::new(10, 0).as_bytes(),
            SratApic::new(11, 1).as_bytes(),
            SratMemory::new(0x0, 0x4000_0000, 0).as_bytes(),
            SratMemory::new(0x4000_0000, 0x4000_0000, 1).as_bytes(),
        ]);

        let mut state = Discovery::new();
        AcpiSource::new(&madt, &srat, None)
            .probe(&mut state)
            .unwrap();

        assert!(!state.failed());
        assert!(state.firmware_active());
        assert_eq!(state.node_for_hwid(10), NodeId::new(0).unwrap());
        assert_eq!(state.node_for_hwid(11), NodeId::new(1).unwrap());
        assert_eq!(state.memblks.len(), 2);
    }

    #[test]
    fn gicc_uid_resolution() {
        let madt = madt(&[
            MadtGicc::new(0, 0x0000).as_bytes(),
            MadtGicc::new(1, 0x0100).as_bytes(),
        ]);
        let srat = srat(&[
            srat::SratGicc::new(0, 0).as_bytes(),
            srat::SratGicc::new(1, 1).as_bytes(),
            SratMemory::new(0x0, 0x1000_0000, 0).as_bytes(),
            SratMemory::new(0x1000_0000, 0x1000_0000, 1).as_bytes(),
        ]);

        let mut state = Discovery::new();
        AcpiSource::new(&madt, &srat, None)
            .probe(&mut state)
            .unwrap();

        assert!(!state.failed());
        assert_eq!(state.node_for_hwid(0x0100), NodeId::new(1).unwrap());
    }

    #[test]
    fn placeholder_mpidr_fails_discovery() {
        let madt = madt(&[MadtGicc::new(0, MPIDR_INVALID).as_bytes()]);
        let srat = srat(&[SratMemory::new(0x0, 0x1000_0000, 0).as_bytes()]);

        let mut state = Discovery::new();
        AcpiSource::new(&madt, &srat, None)
            .probe(&mut state)
            .unwrap();
        assert!(state.failed());
    }

    #[test]
    fn unknown_srat_uid_fails_discovery() {
        let madt = madt(&[MadtGicc::new(0, 0x0).as_bytes()]);
        let srat = srat(&[srat::SratGicc::new(9, 0).as_bytes()]);

        let mut state = Discovery::new();
        AcpiSource::new(&madt, &srat, None)
            .probe(&mut state)
            .unwrap();
        assert!(state.failed());
    }

    #[test]
    fn plausible_slit_adopted() {
        let madt = madt(&[MadtLocalApic::new(0, 10).as_bytes()]);
        let srat = srat(&[
            SratMemory::new(0x0, 0x1000, 0).as_bytes(),
            SratMemory::new(0x1000, 0x1000, 1).as_bytes(),
        ]);
        let slit = slit::build_slit(2, &[10, 17, 21, 10]);

        let mut state = Discovery::new();
        AcpiSource::new(&madt, &srat, Some(&slit))
            .probe(&mut state)
            .unwrap();

        let n0 = NodeId::new(0).unwrap();
        let n1 = NodeId::new(1).unwrap();
        assert_eq!(state.distance.get(n0, n1), 17);
        assert_eq!(state.distance.get(n1, n0), 21);
        assert_eq!(state.distance.get(n0, n0), 10);
    }

    #[test]
    fn implausible_slit_discarded_without_failing() {
        let madt = madt(&[MadtLocalApic::new(0, 10).as_bytes()]);
        let srat = srat(&[
            SratMemory::new(0x0, 0x1000, 0).as_bytes(),
            SratMemory::new(0x1000, 0x1000, 1).as_bytes(),
        ]);
        // Off-diagonal equal to local distance is implausible.
        let slit = slit::build_slit(2, &[10, 10, 20, 10]);

        let mut state = Discovery::new();
        AcpiSource::new(&madt, &srat, Some(&slit))
            .probe(&mut state)
            .unwrap();

        assert!(!state.failed());
        let n0 = NodeId::new(0).unwrap();
        let n1 = NodeId::new(1).unwrap();
        // Defaults, not the discarded matrix.
        assert_eq!(state.distance.get(n0, n1), crate::REMOTE_DISTANCE);
    }

    #[test]
    fn truncated_srat_is_a_parse_error() {
        let madt = madt(&[]);
        let mut srat = srat(&[SratMemory::new(0x0, 0x1000, 0).as_bytes()]);
        srat.truncate(srat.len() - 4);
        // Fix up the header length so only the record is truncated.
        let total = srat.len();
        srat[4..8].copy_from_slice(&(total as u32).to_le_bytes());

        let mut state = Discovery::new();
        let err = AcpiSource::new(&madt, &srat, None).probe(&mut state);
        assert!(err.is_err());
    }
}
