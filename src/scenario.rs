//! Scenario driver
//!
//! `ScenarioBuilder` sequences the build phase: nodes, links, addresses,
//! routes, mobility, cellular attachment and bearers, then applications.
//! `build()` validates setup order and reachability and freezes everything
//! into a `Scenario`, which is the only thing that talks to the engine.

use crate::cellular::{AttachState, Attached, Bearer, PacketCore, TrafficTemplate, DEFAULT_GATEWAY};
use crate::engine::{SimulationEngine, Simulator};
use crate::link::{
    CellularDevices, DeviceGroup, DeviceId, DeviceRole, LinkFabric, LinkKind, SegmentId,
    WifiDevices,
};
use crate::mobility::Vector;
use crate::network::{DropReason, NetEvent, NetworkRuntime, Topology};
use crate::node::{NodeId, NodeRole, NodeSet};
use crate::pcap::PcapSet;
use crate::time::SimTime;
use crate::trace::{events, TraceEntry, TraceRecorder};
use crate::traffic::{
    App, AppId, AppKind, AppStats, Protocol, SinkSpec, SourceSpec, TrafficError,
    TrafficOrchestrator,
};
use crate::ScenarioError;
use ipnetwork::Ipv4Network;
use scenarios::{GridSpec, LinkProfile, LinkProfiles, QosClass};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What `build()` does with a flow whose path cannot be walked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReachabilityPolicy {
    /// Reject the build
    #[default]
    Enforce,
    /// Log it; the flow runs and delivers nothing
    Warn,
}

/// A flow that failed the reachability walk under `ReachabilityPolicy::Warn`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnreachableFlow {
    pub app: AppId,
    pub destination: SocketAddrV4,
    pub reason: DropReason,
}

/// A stacked, addressed node that can reach neither the packet core nor
/// any node that can
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrandedNode {
    pub node: NodeId,
    pub destination: Ipv4Addr,
    pub reason: DropReason,
}

/// Collects the build phase
pub struct ScenarioBuilder {
    name: String,
    topology: Topology,
    traffic: TrafficOrchestrator,
    stop_at: Option<SimTime>,
    reachability: ReachabilityPolicy,
    trace_path: Option<PathBuf>,
    pcap_dir: Option<PathBuf>,
}

impl ScenarioBuilder {
    pub fn new(name: impl Into<String>, profiles: LinkProfiles) -> Self {
        Self {
            name: name.into(),
            topology: Topology::new(LinkFabric::new(profiles)),
            traffic: TrafficOrchestrator::new(),
            stop_at: None,
            reachability: ReachabilityPolicy::default(),
            trace_path: None,
            pcap_dir: None,
        }
    }

    /// Aggregate `carriers` component carriers on cellular segments
    /// installed afterwards
    pub fn with_component_carriers(mut self, carriers: u8) -> Self {
        self.topology.fabric = self.topology.fabric.with_component_carriers(carriers);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read access to everything built so far
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn traffic(&self) -> &TrafficOrchestrator {
        &self.traffic
    }

    // Nodes

    pub fn create_nodes(&mut self, role: NodeRole, count: usize) -> NodeSet {
        self.topology.nodes.create(role, count)
    }

    pub fn create_node(&mut self, role: NodeRole) -> NodeId {
        self.topology.nodes.create_one(role)
    }

    pub fn install_stack(&mut self, nodes: &NodeSet) -> Result<(), ScenarioError> {
        Ok(self.topology.nodes.install_stack(nodes)?)
    }

    // Links

    pub fn install_link(&mut self, kind: LinkKind, nodes: &NodeSet) -> Result<DeviceGroup, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.fabric.install(kind, nodes, &t.nodes)?)
    }

    pub fn install_link_by_tag(&mut self, tag: &str, nodes: &NodeSet) -> Result<DeviceGroup, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.fabric.install_by_tag(tag, nodes, &t.nodes)?)
    }

    /// Point-to-point link with an explicit profile
    pub fn install_point_to_point(
        &mut self,
        a: NodeId,
        b: NodeId,
        profile: LinkProfile,
    ) -> Result<DeviceGroup, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.fabric.install_point_to_point(a, b, profile, &t.nodes)?)
    }

    pub fn install_wireless_lan(
        &mut self,
        access_points: &NodeSet,
        stations: &NodeSet,
    ) -> Result<WifiDevices, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.fabric.install_wireless_lan(access_points, stations, &t.nodes)?)
    }

    pub fn install_cellular(
        &mut self,
        base_stations: &NodeSet,
        mobiles: &NodeSet,
    ) -> Result<CellularDevices, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.fabric.install_cellular(base_stations, mobiles, &t.nodes)?)
    }

    /// Add nodes to an existing, not yet addressed segment
    pub fn join_segment(
        &mut self,
        segment: SegmentId,
        nodes: &NodeSet,
        role: DeviceRole,
    ) -> Result<DeviceGroup, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.fabric.install_into(segment, nodes, role, &t.nodes)?)
    }

    // Addresses and routes

    pub fn assign_addresses(
        &mut self,
        segment: SegmentId,
        prefix: Ipv4Network,
    ) -> Result<Vec<Ipv4Addr>, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.addrs.assign_addresses(&mut t.fabric, &t.nodes, segment, prefix)?)
    }

    /// Keep a prefix out of every later assignment
    pub fn reserve_prefix(&mut self, prefix: Ipv4Network, owner: &str) -> Result<(), ScenarioError> {
        Ok(self.topology.addrs.reserve(prefix, owner)?)
    }

    pub fn install_route(
        &mut self,
        node: NodeId,
        destination: Ipv4Network,
        next_hop: Option<Ipv4Addr>,
        egress: DeviceId,
    ) -> Result<(), ScenarioError> {
        let t = &mut self.topology;
        Ok(t.routes
            .install_route(&t.fabric, &t.addrs, node, destination, next_hop, egress)?)
    }

    pub fn install_default_route(
        &mut self,
        node: NodeId,
        gateway: Ipv4Addr,
        egress: DeviceId,
    ) -> Result<(), ScenarioError> {
        let t = &mut self.topology;
        Ok(t.routes
            .install_default_route(&t.fabric, &t.addrs, node, gateway, egress)?)
    }

    /// Shortest-path routes over the segments addressed so far
    pub fn populate_global_routes(&mut self) -> Result<usize, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.routes.populate_global_routes(&t.nodes, &t.fabric, &t.addrs)?)
    }

    // Mobility

    pub fn set_position(&mut self, node: NodeId, position: Vector) -> Result<(), ScenarioError> {
        let t = &mut self.topology;
        Ok(t.mobility.set_position(&t.nodes, node, position)?)
    }

    pub fn set_grid_positions(
        &mut self,
        nodes: &NodeSet,
        spec: &GridSpec,
    ) -> Result<Vec<Vector>, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.mobility.set_grid_positions(&t.nodes, nodes, spec)?)
    }

    pub fn set_velocity(
        &mut self,
        node: NodeId,
        initial: Vector,
        velocity: Vector,
    ) -> Result<(), ScenarioError> {
        let t = &mut self.topology;
        Ok(t.mobility.set_velocity(&t.nodes, node, initial, velocity)?)
    }

    pub fn schedule_course_change(
        &mut self,
        node: NodeId,
        at: SimTime,
        velocity: Vector,
    ) -> Result<(), ScenarioError> {
        Ok(self.topology.mobility.schedule_course_change(node, at, velocity)?)
    }

    // Cellular

    /// Gateway, mobile pool and backhaul for the base stations already on
    /// the cellular segment
    pub fn create_packet_core(&mut self, cell: SegmentId) -> Result<NodeId, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.cellular
            .create_packet_core(&mut t.nodes, &mut t.fabric, &mut t.addrs, cell)?)
    }

    pub fn packet_core(&self) -> Option<&PacketCore> {
        self.topology.cellular.packet_core()
    }

    pub fn attach(&mut self, mobile: DeviceId, base_station: DeviceId) -> Result<Attached, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.cellular.attach(&t.fabric, mobile, base_station)?)
    }

    pub fn assign_mobile_address(&mut self, attached: &Attached) -> Result<Ipv4Addr, ScenarioError> {
        let t = &mut self.topology;
        Ok(t.cellular.assign_mobile_address(&mut t.addrs, attached)?)
    }

    pub fn activate_bearer(
        &mut self,
        mobiles: &[DeviceId],
        qos: QosClass,
        template: TrafficTemplate,
    ) -> Result<Vec<Bearer>, ScenarioError> {
        Ok(self.topology.cellular.activate_bearer(mobiles, qos, template)?)
    }

    // Traffic

    pub fn install_source(&mut self, spec: SourceSpec) -> Result<AppId, ScenarioError> {
        Ok(self.traffic.install_source(&self.topology.nodes, spec)?)
    }

    pub fn install_sink(&mut self, spec: SinkSpec) -> Result<AppId, ScenarioError> {
        Ok(self.traffic.install_sink(&self.topology.nodes, spec)?)
    }

    // Run parameters

    pub fn stop_at(&mut self, at: SimTime) -> &mut Self {
        self.stop_at = Some(at);
        self
    }

    pub fn reachability(&mut self, policy: ReachabilityPolicy) -> &mut Self {
        self.reachability = policy;
        self
    }

    pub fn trace_to(&mut self, path: impl Into<PathBuf>) -> &mut Self {
        self.trace_path = Some(path.into());
        self
    }

    pub fn pcap_to(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.pcap_dir = Some(dir.into());
        self
    }

    /// Nodes an application touches: its own and the destination's owner
    fn touched_nodes(&self, app: &App) -> Vec<NodeId> {
        let mut nodes = vec![app.node()];
        if let Some(source) = app.source() {
            if let Some(owner) = self.topology.owner_of(*source.destination.ip()) {
                if owner != app.node() {
                    nodes.push(owner);
                }
            }
        }
        nodes
    }

    /// Addressing, attachment and bearer must be complete for every mobile
    /// the app touches, and flows on mobile or routed nodes start after
    /// setup, which completes at time zero
    fn check_setup(&self, app: &App) -> Result<(), TrafficError> {
        let t = &self.topology;
        for node in self.touched_nodes(app) {
            for device in t.fabric.devices_of(node) {
                let is_mobile = t
                    .fabric
                    .device(*device)
                    .is_ok_and(|d| d.role == DeviceRole::MobileStation);
                if !is_mobile {
                    continue;
                }
                let missing = match t.cellular.state(*device) {
                    AttachState::Unattached => Some("attachment"),
                    AttachState::Attached { .. } => Some("bearer"),
                    AttachState::BearerActive { .. } => None,
                }
                .or_else(|| (!t.addrs.is_addressed(*device)).then_some("address"));
                if let Some(missing) = missing {
                    return Err(TrafficError::SetupIncomplete {
                        app: app.id,
                        node,
                        missing,
                    });
                }
            }
            let routed = t.has_mobile_device(node) || t.routes.has_routes(node);
            if routed && app.start() == SimTime::ZERO {
                return Err(TrafficError::StartsBeforeSetup {
                    app: app.id,
                    node,
                    start: app.start(),
                });
            }
        }
        Ok(())
    }

    /// Walk the forward path of a source, and the return path of an echo
    /// client, against the frozen tables
    fn check_reachability(&self, app: &App) -> Result<(), DropReason> {
        let Some(source) = app.source() else {
            return Ok(());
        };
        let t = &self.topology;
        let path = t.trace_path(source.node, app.port, source.destination, source.packet_size)?;
        let Some(last) = path.last().copied() else {
            return Err(DropReason::NoRoute);
        };
        if self.traffic.listener(last, source.destination.port()).is_none() {
            return Err(DropReason::NoListener);
        }
        if source.protocol == Protocol::UdpEcho {
            let src_ip = t
                .source_address(source.node, *source.destination.ip())
                .ok_or(DropReason::NoRoute)?;
            t.trace_path(
                last,
                source.destination.port(),
                SocketAddrV4::new(src_ip, app.port),
                source.packet_size,
            )?;
        }
        Ok(())
    }

    fn has_active_bearer(&self, node: NodeId) -> bool {
        let t = &self.topology;
        t.fabric
            .devices_of(node)
            .iter()
            .any(|d| matches!(t.cellular.state(*d), AttachState::BearerActive { .. }))
    }

    fn addresses_of(&self, node: NodeId) -> Vec<Ipv4Addr> {
        let t = &self.topology;
        t.fabric
            .devices_of(node)
            .iter()
            .filter_map(|d| t.addrs.address_of(*d))
            .collect()
    }

    /// Grow the set of nodes connected to the packet core from the gateway
    /// and the bearer-holding mobiles; a node joins once it can walk a path
    /// to any address of a member. Whatever never joins is stranded.
    fn stranded_nodes(&self) -> Vec<StrandedNode> {
        let t = &self.topology;
        let Some(core) = t.cellular.packet_core() else {
            return Vec::new();
        };
        let mut connected: BTreeSet<NodeId> = t
            .nodes
            .ids()
            .filter(|n| *n == core.gateway() || self.has_active_bearer(*n))
            .collect();
        let mut pending: Vec<NodeId> = t
            .nodes
            .ids()
            .filter(|n| !connected.contains(n) && t.nodes.has_stack(*n))
            .filter(|n| !self.addresses_of(*n).is_empty())
            .collect();

        let reaches = |node: NodeId, ip: Ipv4Addr| {
            t.trace_path(node, 0, SocketAddrV4::new(ip, 0), 0).is_ok()
        };
        loop {
            let targets: Vec<Ipv4Addr> = connected
                .iter()
                .flat_map(|n| self.addresses_of(*n))
                .collect();
            let (joined, rest): (Vec<NodeId>, Vec<NodeId>) = pending
                .into_iter()
                .partition(|n| targets.iter().any(|ip| reaches(*n, *ip)));
            pending = rest;
            if joined.is_empty() {
                break;
            }
            connected.extend(joined);
        }

        pending
            .into_iter()
            .map(|node| StrandedNode {
                node,
                destination: DEFAULT_GATEWAY,
                reason: t
                    .trace_path(node, 0, SocketAddrV4::new(DEFAULT_GATEWAY, 0), 0)
                    .err()
                    .unwrap_or(DropReason::NoRoute),
            })
            .collect()
    }

    /// Validate and freeze
    pub fn build(self) -> Result<Scenario, ScenarioError> {
        let stop_at = self.stop_at.ok_or(ScenarioError::MissingStopTime)?;
        let mut unreachable = Vec::new();
        for app in self.traffic.apps() {
            self.check_setup(app)?;
            if let Err(reason) = self.check_reachability(app) {
                let destination = app
                    .source()
                    .map(|s| s.destination)
                    .unwrap_or(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, app.port));
                match self.reachability {
                    ReachabilityPolicy::Enforce => {
                        return Err(ScenarioError::Unreachable {
                            app: app.id,
                            destination,
                            reason,
                        })
                    }
                    ReachabilityPolicy::Warn => {
                        warn!("{} cannot reach {}: {}", app.id, destination, reason);
                        unreachable.push(UnreachableFlow {
                            app: app.id,
                            destination,
                            reason,
                        });
                    }
                }
            }
        }
        let mut stranded = Vec::new();
        for node in self.stranded_nodes() {
            match self.reachability {
                ReachabilityPolicy::Enforce => {
                    return Err(ScenarioError::NodeUnreachable {
                        node: node.node,
                        destination: node.destination,
                        reason: node.reason,
                    })
                }
                ReachabilityPolicy::Warn => {
                    warn!("{} cannot reach the packet core: {}", node.node, node.reason);
                    stranded.push(node);
                }
            }
        }
        info!(
            "Scenario '{}' built: {} nodes, {} segments, {} apps, stop at {}",
            self.name,
            self.topology.nodes.len(),
            self.topology.fabric.segments().len(),
            self.traffic.apps().len(),
            stop_at
        );
        Ok(Scenario {
            name: self.name,
            topology: self.topology,
            traffic: self.traffic,
            stop_at,
            trace_path: self.trace_path,
            pcap_dir: self.pcap_dir,
            unreachable,
            stranded,
        })
    }
}

/// A frozen scenario, ready to run
#[derive(Debug, Clone)]
pub struct Scenario {
    name: String,
    topology: Topology,
    traffic: TrafficOrchestrator,
    stop_at: SimTime,
    trace_path: Option<PathBuf>,
    pcap_dir: Option<PathBuf>,
    unreachable: Vec<UnreachableFlow>,
    stranded: Vec<StrandedNode>,
}

impl Scenario {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn traffic(&self) -> &TrafficOrchestrator {
        &self.traffic
    }

    pub fn stop_time(&self) -> SimTime {
        self.stop_at
    }

    pub fn unreachable(&self) -> &[UnreachableFlow] {
        &self.unreachable
    }

    /// Nodes cut off from the packet core, under `ReachabilityPolicy::Warn`
    pub fn stranded(&self) -> &[StrandedNode] {
        &self.stranded
    }

    pub fn trace_path(&self) -> Option<&Path> {
        self.trace_path.as_deref()
    }

    pub fn pcap_dir(&self) -> Option<&Path> {
        self.pcap_dir.as_deref()
    }

    /// Run on the default engine
    pub fn run_default(&self) -> Result<ScenarioReport, ScenarioError> {
        let mut engine = Simulator::new();
        self.run(&mut engine)
    }

    /// Schedule the stop time and every application timer, run the engine,
    /// then tear it down
    pub fn run(
        &self,
        engine: &mut impl SimulationEngine<NetEvent>,
    ) -> Result<ScenarioReport, ScenarioError> {
        info!("Running scenario '{}' until {}", self.name, self.stop_at);
        engine.schedule_stop(self.stop_at);

        let mut runtime = NetworkRuntime::new(&self.topology, &self.traffic);
        if let Some(path) = &self.trace_path {
            runtime = runtime.with_trace(TraceRecorder::create(path)?);
        }
        if let Some(dir) = &self.pcap_dir {
            let pcap = PcapSet::create(dir, &self.name, &self.topology.nodes, &self.topology.fabric)?;
            runtime = runtime.with_pcap(pcap);
        }
        self.record_setup(&mut runtime);

        for (i, change) in self.topology.mobility.course_changes().iter().enumerate() {
            engine.schedule(change.at, NetEvent::CourseChange(i))?;
        }
        for app in self.traffic.apps() {
            engine.schedule(app.start(), NetEvent::Start(app.id))?;
        }
        for app in self.traffic.apps() {
            engine.schedule(app.stop(), NetEvent::Stop(app.id))?;
        }

        let events_processed = engine.run(&mut runtime);
        let final_time = engine.now();
        engine.destroy();
        let output = runtime.finish(final_time)?;
        debug!("Run produced {} trace entries", output.trace_entries);

        let names = |node: NodeId| {
            self.topology
                .nodes
                .name(node)
                .map(str::to_string)
                .unwrap_or_else(|| node.to_string())
        };
        let apps = self
            .traffic
            .apps()
            .iter()
            .zip(output.stats)
            .map(|(app, stats)| AppReport {
                id: app.id,
                kind: app.kind,
                node: names(app.node()),
                port: app.port,
                stats,
            })
            .collect();
        let positions = output
            .positions
            .into_iter()
            .map(|(node, p)| (names(node), p))
            .collect();

        let report = ScenarioReport {
            name: self.name.clone(),
            stop_time: self.stop_at,
            final_time,
            events_processed,
            apps,
            drops: output.drops,
            bearers: self.topology.cellular.bearers().to_vec(),
            positions,
            unreachable: self.unreachable.clone(),
            stranded: self.stranded.clone(),
            trace_entries: output.trace_entries,
        };
        info!(
            "Scenario '{}' finished at {}: {} events, {} packets delivered",
            self.name,
            final_time,
            events_processed,
            report.total_received()
        );
        Ok(report)
    }

    /// Attachment, bearer and mobility state as of time zero
    fn record_setup(&self, runtime: &mut NetworkRuntime<'_>) {
        let t = &self.topology;
        for (mobile, state) in t.cellular.states() {
            let Some(base_station) = state.serving() else {
                continue;
            };
            let node = t.fabric.device(*mobile).map(|d| d.node).ok();
            let mut entry = TraceEntry::new(
                SimTime::ZERO,
                events::ATTACH,
                json!({"base_station": base_station, "address": t.addrs.address_of(*mobile)}),
            )
            .with_device(*mobile);
            if let Some(node) = node {
                entry = entry.with_node(node);
            }
            runtime.record(entry);
        }
        for bearer in t.cellular.bearers() {
            runtime.record(
                TraceEntry::new(
                    SimTime::ZERO,
                    events::BEARER_ACTIVATED,
                    json!({"eps_id": bearer.eps_id, "qos": bearer.qos, "qci": bearer.qos.qci()}),
                )
                .with_device(bearer.mobile),
            );
        }
        for (node, state) in t.mobility.states() {
            runtime.record(
                TraceEntry::new(
                    SimTime::ZERO,
                    events::MOBILITY,
                    json!({"kind": state.kind, "position": state.position, "velocity": state.velocity}),
                )
                .with_node(*node),
            );
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppReport {
    pub id: AppId,
    pub kind: AppKind,
    pub node: String,
    pub port: u16,
    pub stats: AppStats,
}

/// Outcome of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioReport {
    pub name: String,
    pub stop_time: SimTime,
    pub final_time: SimTime,
    pub events_processed: u64,
    pub apps: Vec<AppReport>,
    pub drops: BTreeMap<DropReason, u64>,
    pub bearers: Vec<Bearer>,
    /// Final position per node name
    pub positions: BTreeMap<String, Vector>,
    pub unreachable: Vec<UnreachableFlow>,
    pub stranded: Vec<StrandedNode>,
    pub trace_entries: u64,
}

impl ScenarioReport {
    pub fn app(&self, id: AppId) -> Option<&AppReport> {
        self.apps.iter().find(|a| a.id == id)
    }

    /// Packets accepted by sinks and echo servers
    pub fn total_received(&self) -> u64 {
        self.apps
            .iter()
            .filter(|a| matches!(a.kind, AppKind::PacketSink | AppKind::EchoServer))
            .map(|a| a.stats.received)
            .sum()
    }

    pub fn total_drops(&self) -> u64 {
        self.drops.values().sum()
    }
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Scenario '{}': ran to {} ({} events)",
            self.name, self.final_time, self.events_processed
        )?;
        for app in &self.apps {
            let s = &app.stats;
            match app.kind {
                AppKind::UdpClient => writeln!(f, "  {} {:?} on {}: sent {}", app.id, app.kind, app.node, s.sent)?,
                AppKind::EchoClient => writeln!(
                    f,
                    "  {} {:?} on {}: sent {}, replies {}, rtt mean {} ns",
                    app.id,
                    app.kind,
                    app.node,
                    s.sent,
                    s.echo_replies,
                    s.rtt_mean_ns.map_or("-".to_string(), |v| v.to_string())
                )?,
                AppKind::PacketSink | AppKind::EchoServer => writeln!(
                    f,
                    "  {} {:?} on {}:{}: received {} ({} bytes), lost {}",
                    app.id, app.kind, app.node, app.port, s.received, s.bytes_received, s.lost
                )?,
            }
        }
        for bearer in &self.bearers {
            writeln!(f, "  bearer {} on {}: {}", bearer.eps_id, bearer.mobile, bearer.qos)?;
        }
        for (reason, count) in &self.drops {
            writeln!(f, "  dropped ({}): {}", reason, count)?;
        }
        for flow in &self.unreachable {
            writeln!(f, "  unreachable: {} -> {} ({})", flow.app, flow.destination, flow.reason)?;
        }
        for node in &self.stranded {
            writeln!(f, "  stranded: {} -> {} ({})", node.node, node.destination, node.reason)?;
        }
        Ok(())
    }
}
