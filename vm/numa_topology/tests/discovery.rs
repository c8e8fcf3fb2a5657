// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end discovery scenarios: raw ACPI tables in, finished topology out.

use acpi_numa_spec::madt::MadtHeader;
use acpi_numa_spec::madt::MadtLocalApic;
use acpi_numa_spec::madt::MADT_REVISION;
use acpi_numa_spec::srat::SratApic;
use acpi_numa_spec::srat::SratHeader;
use acpi_numa_spec::srat::SratMemory;
use acpi_numa_spec::srat::SRAT_REVISION;
use acpi_numa_spec::Header;
use core::mem::size_of;
use numa_topology::acpi::AcpiSource;
use numa_topology::discover;
use numa_topology::CpuHwId;
use numa_topology::IdentityPdx;
use numa_topology::NodeId;
use numa_topology::NumaOption;
use numa_topology::Platform;
use numa_topology::TopologyKind;
use phys_range::PhysRange;
use zerocopy::IntoBytes;

fn table(signature: [u8; 4], revision: u8, fixed: &[u8], records: &[&[u8]]) -> Vec<u8> {
    let total =
        size_of::<Header>() + fixed.len() + records.iter().map(|r| r.len()).sum::<usize>();
    let mut raw = Vec::with_capacity(total);
    raw.extend_from_slice(Header::new(signature, revision, total).as_bytes());
    raw.extend_from_slice(fixed);
    for r in records {
        raw.extend_from_slice(r);
    }
    raw
}

fn madt(records: &[&[u8]]) -> Vec<u8> {
    table(*b"APIC", MADT_REVISION, MadtHeader::new().as_bytes(), records)
}

fn srat(records: &[&[u8]]) -> Vec<u8> {
    table(*b"SRAT", SRAT_REVISION, SratHeader::new().as_bytes(), records)
}

fn two_cpu_platform(ram: &[core::ops::Range<u64>]) -> Platform {
    Platform {
        ram: ram.iter().map(|r| PhysRange::new(r.clone())).collect(),
        cpus: vec![
            CpuHwId { cpu: 0, hwid: 10 },
            CpuHwId { cpu: 1, hwid: 11 },
        ],
    }
}

fn node(i: usize) -> NodeId {
    NodeId::new(i).unwrap()
}

#[test]
fn two_node_system() {
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
    let platform = two_cpu_platform(&[0x0..0x8000_0000]);

    let source = AcpiSource::new(&madt, &srat, None);
    let t = discover(NumaOption::On, &source, &platform, IdentityPdx);

    assert_eq!(t.kind(), TopologyKind::Active);
    assert_eq!(t.num_nodes(), 2);
    assert!(t.is_node_online(node(0)));
    assert!(t.is_node_online(node(1)));

    assert_eq!(t.node_for_cpu(0), node(0));
    assert_eq!(t.node_for_cpu(1), node(1));
    assert_eq!(t.node_for_address(0x3fff_ffff), node(0));
    assert_eq!(t.node_for_address(0x4000_0000), node(1));

    // Every address in RAM maps to some online node.
    for addr in [0x0, 0x1234_5678, 0x4000_0000, 0x7fff_ffff] {
        let n = t.node_for_address(addr);
        assert!(t.is_node_online(n), "address {addr:#x} unowned");
    }

    let info = t.node_info(node(1)).unwrap();
    assert_eq!(info.span, PhysRange::new(0x4000_0000..0x8000_0000));
    assert_eq!(info.start_pfn, 0x4_0000);
    assert_eq!(info.spanned_pages, 0x4_0000);

    assert!(t.cpus_on_node(node(0)).test(0));
    assert!(t.cpus_on_node(node(1)).test(1));
}

#[test]
fn same_node_overlap_with_matching_hotplug_is_benign() {
    let madt = madt(&[MadtLocalApic::new(0, 10).as_bytes()]);
    let srat = srat(&[
        SratApic::new(10, 5).as_bytes(),
        SratMemory::new(0x1000, 0x1000, 5).as_bytes(),
        SratMemory::new(0x1000, 0x1000, 5).as_bytes(),
    ]);
    let platform = two_cpu_platform(&[0x1000..0x2000]);

    let source = AcpiSource::new(&madt, &srat, None);
    let t = discover(NumaOption::On, &source, &platform, IdentityPdx);

    assert_eq!(t.kind(), TopologyKind::Active);
    assert_eq!(t.num_nodes(), 1);
    let n = t.online_nodes().next().unwrap();
    assert_eq!(t.node_info(n).unwrap().span, PhysRange::new(0x1000..0x2000));
}

#[test]
fn hotplug_flag_mismatch_falls_back_to_dummy() {
    let madt = madt(&[MadtLocalApic::new(0, 10).as_bytes()]);
    let srat = srat(&[
        SratMemory::new(0x1000, 0x1000, 5).as_bytes(),
        SratMemory::new(0x1000, 0x1000, 5).hotplug().as_bytes(),
    ]);
    let platform = two_cpu_platform(&[0x1000..0x2000]);

    let source = AcpiSource::new(&madt, &srat, None);
    let t = discover(NumaOption::On, &source, &platform, IdentityPdx);

    assert_eq!(t.kind(), TopologyKind::Dummy);
    assert_eq!(t.num_nodes(), 1);
    assert_eq!(
        t.node_info(NodeId::ZERO).unwrap().span,
        PhysRange::new(0x1000..0x2000)
    );
    assert_eq!(t.node_for_cpu(0), NodeId::ZERO);
    assert_eq!(t.node_for_cpu(1), NodeId::ZERO);
}

#[test]
fn cross_node_overlap_falls_back_to_dummy() {
    let madt = madt(&[]);
    let srat = srat(&[
        SratMemory::new(0x0, 0x3000, 0).as_bytes(),
        SratMemory::new(0x2000, 0x2000, 1).as_bytes(),
    ]);
    let platform = two_cpu_platform(&[0x0..0x4000]);

    let source = AcpiSource::new(&madt, &srat, None);
    let t = discover(NumaOption::On, &source, &platform, IdentityPdx);
    assert_eq!(t.kind(), TopologyKind::Dummy);
}

#[test]
fn ram_not_covered_by_any_node_falls_back_to_dummy() {
    // The SRAT only accounts for the first bank.
    let madt = madt(&[]);
    let srat = srat(&[SratMemory::new(0x0, 0x1000_0000, 0).as_bytes()]);
    let platform = two_cpu_platform(&[0x0..0x1000_0000, 0x8000_0000..0x9000_0000]);

    let source = AcpiSource::new(&madt, &srat, None);
    let t = discover(NumaOption::On, &source, &platform, IdentityPdx);

    assert_eq!(t.kind(), TopologyKind::Dummy);
    // The dummy still covers everything, including the unclaimed bank.
    assert_eq!(t.node_for_address(0x8800_0000), NodeId::ZERO);
}

#[test]
fn truncated_srat_falls_back_to_dummy() {
    let madt = madt(&[]);
    let mut srat = srat(&[SratMemory::new(0x0, 0x1000_0000, 0).as_bytes()]);
    srat.truncate(srat.len() - 4);
    let total = srat.len();
    srat[4..8].copy_from_slice(&(total as u32).to_le_bytes());
    let platform = two_cpu_platform(&[0x0..0x1000_0000]);

    let source = AcpiSource::new(&madt, &srat, None);
    let t = discover(NumaOption::On, &source, &platform, IdentityPdx);
    assert_eq!(t.kind(), TopologyKind::Dummy);
}

#[test]
fn proximity_domain_overflow_falls_back_to_dummy() {
    // More distinct proximity domains than the node tables can hold.
    let records: Vec<SratMemory> = (0..65u32)
        .map(|pxm| SratMemory::new(pxm as u64 * 0x1000, 0x1000, pxm))
        .collect();
    let refs: Vec<&[u8]> = records.iter().map(|r| r.as_bytes()).collect();
    let madt = madt(&[]);
    let srat = srat(&refs);
    let platform = two_cpu_platform(&[0x0..0x41000]);

    let source = AcpiSource::new(&madt, &srat, None);
    let t = discover(NumaOption::On, &source, &platform, IdentityPdx);
    assert_eq!(t.kind(), TopologyKind::Dummy);
}

#[test]
fn cpu_without_affinity_record_is_round_robined() {
    // CPU 1's APIC id never appears in the SRAT.
    let madt = madt(&[
        MadtLocalApic::new(0, 10).as_bytes(),
        MadtLocalApic::new(1, 11).as_bytes(),
    ]);
    let srat = srat(&[
        SratApic::new(10, 0).as_bytes(),
        SratMemory::new(0x0, 0x4000_0000, 0).as_bytes(),
        SratMemory::new(0x4000_0000, 0x4000_0000, 1).as_bytes(),
    ]);
    let platform = two_cpu_platform(&[0x0..0x8000_0000]);

    let source = AcpiSource::new(&madt, &srat, None);
    let t = discover(NumaOption::On, &source, &platform, IdentityPdx);

    assert_eq!(t.kind(), TopologyKind::Active);
    assert_eq!(t.node_for_cpu(0), node(0));
    // Never left unassigned.
    assert!(t.node_for_cpu(1).is_some());
    assert!(t.is_node_online(t.node_for_cpu(1)));
}

#[test]
fn off_skips_discovery_entirely() {
    // Even a contradictory SRAT is never read.
    let madt = madt(&[]);
    let srat = srat(&[
        SratMemory::new(0x0, 0x3000, 0).as_bytes(),
        SratMemory::new(0x2000, 0x2000, 1).as_bytes(),
    ]);
    let platform = two_cpu_platform(&[0x0..0x4000]);

    let source = AcpiSource::new(&madt, &srat, None);
    let t = discover(NumaOption::Off, &source, &platform, IdentityPdx);

    assert_eq!(t.kind(), TopologyKind::Off);
    assert_eq!(t.num_nodes(), 1);
    assert_eq!(t.node_for_address(0x3fff), NodeId::ZERO);
}

#[test]
fn owned_srat_collects_records() {
    let srat = srat(&[
        SratApic::new(10, 0).as_bytes(),
        SratMemory::new(0x0, 0x4000_0000, 0).as_bytes(),
        SratMemory::new(0x4000_0000, 0x4000_0000, 1).as_bytes(),
    ]);
    let owned = acpi_numa_spec::srat::OwnedSrat::new(&srat).unwrap();
    assert_eq!(owned.revision, SRAT_REVISION);
    assert_eq!(owned.apics.len(), 1);
    assert_eq!(owned.memory.len(), 2);
    assert_eq!(owned.memory[1].base_address(), 0x4000_0000);
}

#[test]
fn fake_nodes_cover_all_of_ram() {
    let madt = madt(&[]);
    let srat = srat(&[]);
    let platform = two_cpu_platform(&[0x0..0x8000_0000]);

    let source = AcpiSource::new(&madt, &srat, None);
    let t = discover(NumaOption::Fake(4), &source, &platform, IdentityPdx);

    assert_eq!(t.kind(), TopologyKind::Active);
    assert_eq!(t.num_nodes(), 4);
    for addr in (0x0..0x8000_0000u64).step_by(0x800_0000) {
        assert!(t.is_node_online(t.node_for_address(addr)));
    }
    assert_eq!(t.node_for_address(0x0), node(0));
    assert_eq!(t.node_for_address(0x7fff_ffff), node(3));
}
