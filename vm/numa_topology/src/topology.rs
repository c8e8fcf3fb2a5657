// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The topology orchestrator and the finished, read-only topology.
//!
//! [`discover`] sequences one boot attempt: run the configured firmware
//! source, validate what it produced (RAM coverage, span sanity), build the
//! address hash, and finalize. Failure anywhere discards the whole attempt
//! and installs the dummy single-node topology, which is built from the RAM
//! map alone and cannot fail. Bad firmware data degrades placement; it never
//! stops boot.

use crate::cpumask::CpuMask;
use crate::discovery::Discovery;
use crate::discovery::NumaSource;
use crate::discovery::SourceKind;
use crate::distance::DistanceMatrix;
use crate::memblk::MemblkRegistry;
use crate::memnodemap;
use crate::memnodemap::MemNodeMap;
use crate::memnodemap::PdxCompressor;
use crate::options::NumaOption;
use crate::NodeId;
use crate::NodeMask;
use crate::MAX_NUMNODES;
use phys_range::uncovered_portion;
use phys_range::PhysRange;

const PAGE_SHIFT: u32 = 12;

/// A CPU index paired with the hardware id firmware knows it by (local APIC
/// id, MPIDR affinity bits, or device-tree enumeration index).
#[derive(Copy, Clone, Debug)]
pub struct CpuHwId {
    /// The dense CPU index.
    pub cpu: usize,
    /// The hardware id affinity records refer to.
    pub hwid: u64,
}

/// What the platform knows before NUMA discovery runs: the RAM banks from
/// the boot memory map and the enumerated CPUs.
#[derive(Clone, Debug, Default)]
pub struct Platform {
    /// The RAM banks, non-overlapping but in no particular order.
    pub ram: Vec<PhysRange>,
    /// The CPUs.
    pub cpus: Vec<CpuHwId>,
}

impl Platform {
    /// The bounding interval of all RAM banks.
    fn ram_span(&self) -> PhysRange {
        self.ram
            .iter()
            .filter(|bank| !bank.is_empty())
            .fold(PhysRange::EMPTY, |acc, bank| {
                if acc.is_empty() {
                    *bank
                } else {
                    acc.hull(bank)
                }
            })
    }
}

/// How the final topology was obtained.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TopologyKind {
    /// Firmware discovery succeeded (or emulation was requested).
    Active,
    /// Discovery failed or produced nothing; single-node fallback.
    Dummy,
    /// NUMA was disabled by configuration; single-node, same shape as
    /// [`TopologyKind::Dummy`].
    Off,
}

/// Per-node memory bookkeeping, fixed at finalize.
#[derive(Copy, Clone, Debug, Default)]
pub struct NodeInfo {
    /// The coalesced physical span, clamped to RAM.
    pub span: PhysRange,
    /// First page frame number of the span.
    pub start_pfn: u64,
    /// Number of page frames the span covers.
    pub spanned_pages: u64,
}

/// The finished NUMA topology.
///
/// Built once, single-threaded, during early boot; immutable and freely
/// shared across processors afterwards. Every query is total: out-of-range
/// arguments report [`NodeId::NONE`] or defaults, never panic.
#[derive(Debug)]
pub struct Topology<C: PdxCompressor = memnodemap::IdentityPdx> {
    kind: TopologyKind,
    online: NodeMask,
    nodes: Vec<NodeInfo>,
    cpu_to_node: Vec<NodeId>,
    node_cpus: Vec<CpuMask>,
    distance: DistanceMatrix,
    map: MemNodeMap,
    compressor: C,
}

impl<C: PdxCompressor> Topology<C> {
    /// How this topology was obtained.
    pub fn kind(&self) -> TopologyKind {
        self.kind
    }

    /// The node owning physical address `addr`. O(1).
    pub fn node_for_address(&self, addr: u64) -> NodeId {
        self.map.node_at(addr, &self.compressor)
    }

    /// The node `cpu` belongs to.
    pub fn node_for_cpu(&self, cpu: usize) -> NodeId {
        self.cpu_to_node
            .get(cpu)
            .copied()
            .unwrap_or(NodeId::NONE)
    }

    /// The relative access cost from `a` to `b`.
    pub fn distance(&self, a: NodeId, b: NodeId) -> u8 {
        self.distance.get(a, b)
    }

    /// Whether `node` is online.
    pub fn is_node_online(&self, node: NodeId) -> bool {
        self.online.contains(node)
    }

    /// Iterates over the online nodes.
    pub fn online_nodes(&self) -> impl Iterator<Item = NodeId> + Clone + use<C> {
        self.online.iter()
    }

    /// The number of online nodes.
    pub fn num_nodes(&self) -> usize {
        self.online.count()
    }

    /// Memory bookkeeping for `node`, if it is online.
    pub fn node_info(&self, node: NodeId) -> Option<&NodeInfo> {
        self.online.contains(node).then(|| &self.nodes[node.index()])
    }

    /// The CPUs assigned to `node`. [`NodeId::NONE`] owns no CPUs.
    pub fn cpus_on_node(&self, node: NodeId) -> &CpuMask {
        static NO_CPUS: CpuMask = CpuMask::new();
        if !node.is_some() {
            return &NO_CPUS;
        }
        &self.node_cpus[node.index()]
    }

    /// The granularity of the address hash.
    pub fn hash_shift(&self) -> u32 {
        self.map.shift()
    }
}

/// Discovers the NUMA topology for this boot.
///
/// `source` is the architecture's firmware description; `compressor` is the
/// platform's physical-to-packed address transform, used to size the lookup
/// table. Always returns a usable topology.
pub fn discover<C: PdxCompressor>(
    option: NumaOption,
    source: &dyn NumaSource,
    platform: &Platform,
    compressor: C,
) -> Topology<C> {
    match option {
        NumaOption::Off => {
            tracing::info!("NUMA disabled by configuration");
            return dummy(platform, compressor, TopologyKind::Off);
        }
        NumaOption::Fake(n) => {
            return match emulate(n, platform, &compressor) {
                Some(built) => finalize(built, platform, compressor),
                None => dummy(platform, compressor, TopologyKind::Dummy),
            };
        }
        NumaOption::On => {}
        NumaOption::NoAcpi => {
            if source.kind() == SourceKind::Acpi {
                tracing::info!("ACPI NUMA source disabled by configuration");
                return dummy(platform, compressor, TopologyKind::Dummy);
            }
        }
    }

    let mut state = Discovery::new();
    if let Err(error) = source.probe(&mut state) {
        tracing::warn!(
            error = &error as &dyn core::error::Error,
            "firmware NUMA description unusable"
        );
        return dummy(platform, compressor, TopologyKind::Dummy);
    }
    if !state.firmware_active() {
        tracing::warn!("no usable NUMA affinity information");
        return dummy(platform, compressor, TopologyKind::Dummy);
    }

    match validate(state, platform, &compressor) {
        Some(built) => finalize(built, platform, compressor),
        None => dummy(platform, compressor, TopologyKind::Dummy),
    }
}

/// Everything a successful probe or emulation produces, ready to finalize.
struct Validated {
    state: Discovery,
    online: NodeMask,
    map: MemNodeMap,
}

/// Clamps spans to RAM, checks that parsed nodes claim every RAM bank, and
/// builds the address hash.
fn validate<C: PdxCompressor>(
    mut state: Discovery,
    platform: &Platform,
    compressor: &C,
) -> Option<Validated> {
    let ram_span = platform.ram_span();
    if ram_span.is_empty() {
        tracing::warn!("no RAM banks reported by the platform");
        return None;
    }
    state.spans.cutoff_all(ram_span);

    let online = state.spans.all_parsed();
    if state.spans.memory_parsed.is_empty() {
        tracing::warn!("no node claims any memory");
        return None;
    }

    // Every RAM bank must be fully claimed by some parsed node span.
    let spans = state.spans.memory_parsed.iter().map(|n| state.spans.span(n));
    for bank in platform.ram.iter().filter(|bank| !bank.is_empty()) {
        if let Some(gap) = uncovered_portion(*bank, spans.clone()) {
            tracing::warn!(
                start = gap.start(),
                end = gap.end(),
                "RAM not claimed by any node"
            );
            return None;
        }
    }

    let shift = memnodemap::extract_shift(&state.memblks, compressor);
    let map = match MemNodeMap::populate(&state.memblks, shift, compressor) {
        Ok(map) => map,
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn core::error::Error,
                shift,
                "address hash construction failed"
            );
            return None;
        }
    };

    Some(Validated { state, online, map })
}

/// Splits the RAM span into `n` emulated nodes.
///
/// Node size is rounded down to a power of two so the emulated block starts
/// stay aligned for the hash shift; the last node absorbs the remainder.
fn emulate<C: PdxCompressor>(
    n: u8,
    platform: &Platform,
    compressor: &C,
) -> Option<Validated> {
    let ram_span = platform.ram_span();
    if n == 0 || n as usize > MAX_NUMNODES || ram_span.is_empty() {
        tracing::warn!(n, "unsupported emulated node count");
        return None;
    }

    let sz = ram_span.len() / n as u64;
    let sz = if sz == 0 { 0 } else { 1 << (63 - sz.leading_zeros()) };
    if sz == 0 {
        tracing::warn!(n, "not enough memory to emulate nodes");
        return None;
    }
    if ram_span.len() - sz * n as u64 >= sz {
        tracing::warn!(
            node_size = sz,
            "unbalanced emulation, last node absorbs the remainder"
        );
    }

    let mut state = Discovery::new();
    let mut memblks = MemblkRegistry::new();
    let mut online = NodeMask::EMPTY;
    for i in 0..n as u64 {
        let node = NodeId::new(i as usize).unwrap();
        let start = ram_span.start() + i * sz;
        let end = if i == n as u64 - 1 {
            ram_span.end()
        } else {
            start + sz
        };
        let range = PhysRange::new(start..end);
        memblks.register(node, range, false).ok()?;
        state.spans.coalesce(node, range);
        online.set(node);
        tracing::info!(node = %node, start, end, "faking node");
    }

    let shift = memnodemap::extract_shift(&memblks, compressor);
    let map = match MemNodeMap::populate(&memblks, shift, compressor) {
        Ok(map) => map,
        Err(error) => {
            tracing::warn!(
                error = &error as &dyn core::error::Error,
                "emulation hash construction failed"
            );
            return None;
        }
    };

    state.memblks = memblks;
    Some(Validated { state, online, map })
}

/// Builds the immutable topology from validated discovery state.
fn finalize<C: PdxCompressor>(
    built: Validated,
    platform: &Platform,
    compressor: C,
) -> Topology<C> {
    let Validated { state, online, map } = built;

    let mut nodes = vec![NodeInfo::default(); MAX_NUMNODES];
    for node in online.iter() {
        let span = state.spans.span(node);
        if span.is_empty() {
            tracing::warn!(node = %node, "node has no memory");
        }
        nodes[node.index()] = NodeInfo {
            span,
            start_pfn: span.start() >> PAGE_SHIFT,
            spanned_pages: span.len() >> PAGE_SHIFT,
        };
    }

    let cpu_to_node = assign_cpus(&state, online, platform);
    let mut node_cpus = vec![CpuMask::new(); MAX_NUMNODES];
    for (cpu, node) in cpu_to_node.iter().enumerate() {
        if node.is_some() {
            node_cpus[node.index()].set(cpu);
        }
    }

    tracing::info!(
        nodes = online.count(),
        shift = map.shift(),
        "NUMA topology active"
    );
    Topology {
        kind: TopologyKind::Active,
        online,
        nodes,
        cpu_to_node,
        node_cpus,
        distance: state.distance,
        map,
        compressor,
    }
}

/// Gives every CPU a node: its affinity record's node when that node is
/// online, round-robin over the online nodes otherwise.
fn assign_cpus(state: &Discovery, online: NodeMask, platform: &Platform) -> Vec<NodeId> {
    let num_cpus = platform
        .cpus
        .iter()
        .map(|c| c.cpu + 1)
        .max()
        .unwrap_or(0);
    let mut cpu_to_node = vec![NodeId::NONE; num_cpus];
    for c in &platform.cpus {
        let node = state.node_for_hwid(c.hwid);
        if online.contains(node) {
            cpu_to_node[c.cpu] = node;
        }
    }

    let mut rr = online.iter().cycle();
    for slot in &mut cpu_to_node {
        if !slot.is_some() {
            // `online` is never empty here.
            *slot = rr.next().unwrap();
        }
    }
    cpu_to_node
}

/// The unconditional fallback: one online node spanning all of RAM, every
/// CPU on it. Cannot fail.
fn dummy<C: PdxCompressor>(
    platform: &Platform,
    compressor: C,
    kind: TopologyKind,
) -> Topology<C> {
    let span = platform.ram_span();
    if kind == TopologyKind::Dummy {
        tracing::info!(
            start = span.start(),
            end = span.end(),
            "using dummy single-node topology"
        );
    }

    let mut nodes = vec![NodeInfo::default(); MAX_NUMNODES];
    nodes[0] = NodeInfo {
        span,
        start_pfn: span.start() >> PAGE_SHIFT,
        spanned_pages: span.len() >> PAGE_SHIFT,
    };
    let mut online = NodeMask::EMPTY;
    online.set(NodeId::ZERO);

    let num_cpus = platform
        .cpus
        .iter()
        .map(|c| c.cpu + 1)
        .max()
        .unwrap_or(0);
    let mut node_cpus = vec![CpuMask::new(); MAX_NUMNODES];
    for c in &platform.cpus {
        node_cpus[0].set(c.cpu);
    }

    Topology {
        kind,
        online,
        nodes,
        cpu_to_node: vec![NodeId::ZERO; num_cpus],
        node_cpus,
        distance: DistanceMatrix::new(),
        map: MemNodeMap::trivial(NodeId::ZERO),
        compressor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memnodemap::IdentityPdx;
    use crate::LOCAL_DISTANCE;
    use crate::MAX_HASH_SHIFT;

    fn platform(ram: &[core::ops::Range<u64>], cpus: usize) -> Platform {
        Platform {
            ram: ram.iter().map(|r| PhysRange::new(r.clone())).collect(),
            cpus: (0..cpus)
                .map(|cpu| CpuHwId {
                    cpu,
                    hwid: cpu as u64,
                })
                .collect(),
        }
    }

    /// A source that never produces anything.
    struct NullSource;

    impl NumaSource for NullSource {
        fn kind(&self) -> SourceKind {
            SourceKind::Acpi
        }

        fn probe(&self, _state: &mut Discovery) -> Result<(), crate::SourceError> {
            Ok(())
        }
    }

    #[test]
    fn off_is_single_node_over_ram() {
        let p = platform(&[0x1000..0x8000_0000], 4);
        let t = discover(NumaOption::Off, &NullSource, &p, IdentityPdx);
        assert_eq!(t.kind(), TopologyKind::Off);
        assert_eq!(t.num_nodes(), 1);
        assert_eq!(t.node_for_address(0x4000_0000), NodeId::ZERO);
        assert_eq!(t.node_for_cpu(3), NodeId::ZERO);
        assert_eq!(t.hash_shift(), MAX_HASH_SHIFT);
        let info = t.node_info(NodeId::ZERO).unwrap();
        assert_eq!(info.span, PhysRange::new(0x1000..0x8000_0000));
        assert_eq!(info.start_pfn, 1);
    }

    #[test]
    fn empty_probe_falls_back_to_dummy() {
        let p = platform(&[0x0..0x1000_0000, 0x2000_0000..0x3000_0000], 2);
        let t = discover(NumaOption::On, &NullSource, &p, IdentityPdx);
        assert_eq!(t.kind(), TopologyKind::Dummy);
        assert_eq!(t.num_nodes(), 1);
        // The dummy node spans the bounding interval of all banks.
        assert_eq!(
            t.node_info(NodeId::ZERO).unwrap().span,
            PhysRange::new(0x0..0x3000_0000)
        );
        assert_eq!(t.node_for_cpu(0), NodeId::ZERO);
        assert_eq!(t.node_for_cpu(1), NodeId::ZERO);
        assert!(t.cpus_on_node(NodeId::ZERO).test(1));
    }

    #[test]
    fn noacpi_rejects_acpi_source() {
        let p = platform(&[0x0..0x1000_0000], 1);
        let t = discover(NumaOption::NoAcpi, &NullSource, &p, IdentityPdx);
        assert_eq!(t.kind(), TopologyKind::Dummy);
    }

    #[test]
    fn fake_splits_ram() {
        let p = platform(&[0x0..0x8000_0000], 4);
        let t = discover(NumaOption::Fake(2), &NullSource, &p, IdentityPdx);
        assert_eq!(t.kind(), TopologyKind::Active);
        assert_eq!(t.num_nodes(), 2);
        assert_eq!(t.node_for_address(0x0), NodeId::new(0).unwrap());
        assert_eq!(t.node_for_address(0x3fff_ffff), NodeId::new(0).unwrap());
        assert_eq!(t.node_for_address(0x4000_0000), NodeId::new(1).unwrap());
        assert_eq!(t.node_for_address(0x7fff_ffff), NodeId::new(1).unwrap());
        // Emulated nodes use default distances.
        let n0 = NodeId::new(0).unwrap();
        let n1 = NodeId::new(1).unwrap();
        assert_eq!(t.distance(n0, n0), LOCAL_DISTANCE);
        assert_eq!(t.distance(n0, n1), crate::REMOTE_DISTANCE);
        // CPUs are spread round-robin.
        assert_eq!(t.node_for_cpu(0), n0);
        assert_eq!(t.node_for_cpu(1), n1);
        assert_eq!(t.node_for_cpu(2), n0);
    }

    #[test]
    fn fake_with_unaligned_span_gives_last_node_the_remainder() {
        // 0x6000_0000 bytes over 2 nodes: per-node size rounds down to
        // 0x2000_0000, the tail goes to the last node.
        let p = platform(&[0x0..0x6000_0000], 2);
        let t = discover(NumaOption::Fake(2), &NullSource, &p, IdentityPdx);
        assert_eq!(t.num_nodes(), 2);
        assert_eq!(t.node_for_address(0x1fff_ffff), NodeId::new(0).unwrap());
        assert_eq!(t.node_for_address(0x2000_0000), NodeId::new(1).unwrap());
        assert_eq!(t.node_for_address(0x5fff_ffff), NodeId::new(1).unwrap());
    }

    #[test]
    fn fake_too_many_nodes_falls_back() {
        let p = platform(&[0x0..0x1000], 1);
        let t = discover(NumaOption::Fake(65), &NullSource, &p, IdentityPdx);
        assert_eq!(t.kind(), TopologyKind::Dummy);
    }

    #[test]
    fn fake_zero_nodes_falls_back() {
        // The option parser rejects fake=0, but the variant is public;
        // emulation must degrade rather than divide by the node count.
        let p = platform(&[0x0..0x1000_0000], 1);
        let t = discover(NumaOption::Fake(0), &NullSource, &p, IdentityPdx);
        assert_eq!(t.kind(), TopologyKind::Dummy);
        assert_eq!(t.node_for_cpu(0), NodeId::ZERO);
    }

    #[test]
    fn queries_with_the_none_sentinel_do_not_panic() {
        let p = platform(&[0x0..0x1000_0000], 2);
        let t = discover(NumaOption::On, &NullSource, &p, IdentityPdx);
        assert!(t.cpus_on_node(NodeId::NONE).is_empty());
        assert!(!t.is_node_online(NodeId::NONE));
        assert!(t.node_info(NodeId::NONE).is_none());
    }
}
