//! Link/stack model and run-phase packet handling
//!
//! `Topology` is the frozen result of the build phase. Forwarding is a pure
//! function of it: longest-prefix route lookup, neighbour resolution on the
//! egress segment, and the cellular path mobile -> base station -> gateway
//! for devices with an active bearer. Per-hop delay is serialisation plus
//! propagation; there is no contention or loss model.
//!
//! `NetworkRuntime` is the event handler the engine drives during the run.

use crate::addr::AddressAssembler;
use crate::cellular::{CellularManager, FlowDirection};
use crate::engine::{EngineContext, EventHandler, EventId};
use crate::link::{DeviceId, DeviceRole, LinkFabric, SegmentId};
use crate::mobility::{MobilityAssigner, Vector};
use crate::node::{NodeId, NodeRegistry};
use crate::pcap::PcapSet;
use crate::routing::RoutingTables;
use crate::time::SimTime;
use crate::trace::{events, TraceEntry, TraceError, TraceRecorder};
use crate::traffic::{AppId, AppKind, AppStats, Protocol, SendLimit, TrafficOrchestrator};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, trace};

pub const DEFAULT_TTL: u8 = 64;
/// IPv4 plus UDP header bytes
pub const IP_UDP_HEADER: u32 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// No route entry covers the destination
    NoRoute,
    /// Mobile device without a matching active bearer
    NoBearer,
    TtlExpired,
    /// Nothing listens on the destination port
    NoListener,
    /// Next hop address not present on the egress segment
    Unreachable,
    MtuExceeded,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::NoRoute => "no route",
            DropReason::NoBearer => "no bearer",
            DropReason::TtlExpired => "TTL expired",
            DropReason::NoListener => "no listener",
            DropReason::Unreachable => "next hop unreachable",
            DropReason::MtuExceeded => "MTU exceeded",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DatagramKind {
    Data,
    EchoRequest,
    EchoReply,
}

/// One simulated UDP datagram
#[derive(Debug, Clone, PartialEq)]
pub struct Datagram {
    pub id: u64,
    /// Application that emitted it
    pub app: AppId,
    pub kind: DatagramKind,
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    /// UDP payload bytes
    pub payload: u32,
    pub seq: u32,
    pub sent_at: SimTime,
    pub ttl: u8,
}

impl Datagram {
    pub fn wire_size(&self) -> u32 {
        self.payload.saturating_add(IP_UDP_HEADER)
    }
}

/// One link traversal
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub egress: DeviceId,
    pub ingress: DeviceId,
    pub next_node: NodeId,
    pub delay_ns: u64,
    /// EPS bearer id when the hop crosses a cellular segment
    pub bearer: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Forwarding {
    Deliver,
    Forward(Hop),
}

/// Everything the build phase produced
#[derive(Debug, Clone)]
pub struct Topology {
    pub(crate) nodes: NodeRegistry,
    pub(crate) fabric: LinkFabric,
    pub(crate) addrs: AddressAssembler,
    pub(crate) routes: RoutingTables,
    pub(crate) mobility: MobilityAssigner,
    pub(crate) cellular: CellularManager,
}

impl Topology {
    pub fn new(fabric: LinkFabric) -> Self {
        Self {
            nodes: NodeRegistry::new(),
            fabric,
            addrs: AddressAssembler::new(),
            routes: RoutingTables::new(),
            mobility: MobilityAssigner::new(),
            cellular: CellularManager::new(),
        }
    }

    pub fn nodes(&self) -> &NodeRegistry {
        &self.nodes
    }

    pub fn fabric(&self) -> &LinkFabric {
        &self.fabric
    }

    pub fn addrs(&self) -> &AddressAssembler {
        &self.addrs
    }

    pub fn routes(&self) -> &RoutingTables {
        &self.routes
    }

    pub fn mobility(&self) -> &MobilityAssigner {
        &self.mobility
    }

    pub fn cellular(&self) -> &CellularManager {
        &self.cellular
    }

    /// Whether one of the node's devices holds `ip`
    pub fn is_local(&self, node: NodeId, ip: Ipv4Addr) -> bool {
        self.fabric
            .devices_of(node)
            .iter()
            .any(|d| self.addrs.address_of(*d) == Some(ip))
    }

    /// Node owning `ip`
    pub fn owner_of(&self, ip: Ipv4Addr) -> Option<NodeId> {
        let device = self.addrs.device_for(ip)?;
        self.fabric.device(device).ok().map(|d| d.node)
    }

    /// Source address the node uses towards `destination`
    pub fn source_address(&self, node: NodeId, destination: Ipv4Addr) -> Option<Ipv4Addr> {
        if self.is_local(node, destination) {
            return Some(destination);
        }
        let route = self
            .routes
            .lookup(&self.fabric, &self.addrs, node, destination)?;
        self.addrs.address_of(route.egress)
    }

    pub fn has_mobile_device(&self, node: NodeId) -> bool {
        self.fabric.devices_of(node).iter().any(|d| {
            self.fabric
                .device(*d)
                .is_ok_and(|dev| dev.role == DeviceRole::MobileStation)
        })
    }

    fn segment_delay(&self, segment: SegmentId, bytes: u32) -> Result<u64, DropReason> {
        let seg = self
            .fabric
            .segment(segment)
            .map_err(|_| DropReason::Unreachable)?;
        if bytes > seg.profile.mtu as u32 {
            return Err(DropReason::MtuExceeded);
        }
        Ok(seg.profile.serialization_ns(bytes) + seg.profile.delay_ns)
    }

    /// Next step for a datagram sitting at `node`
    pub fn forward(&self, node: NodeId, dgram: &Datagram) -> Result<Forwarding, DropReason> {
        let dst = *dgram.dst.ip();
        if self.is_local(node, dst) {
            return Ok(Forwarding::Deliver);
        }
        let route = self
            .routes
            .lookup(&self.fabric, &self.addrs, node, dst)
            .ok_or(DropReason::NoRoute)?;
        let egress = self
            .fabric
            .device(route.egress)
            .map_err(|_| DropReason::NoRoute)?;
        let next_ip = route.next_hop.unwrap_or(dst);
        let size = dgram.wire_size();

        match egress.role {
            DeviceRole::MobileStation => self.uplink(egress.id, egress.segment, dgram, size),
            DeviceRole::Tunnel => self.downlink(egress.id, egress.segment, next_ip, dgram, size),
            DeviceRole::BaseStation => Err(DropReason::Unreachable),
            _ => {
                let peer = self
                    .addrs
                    .device_for(next_ip)
                    .and_then(|d| self.fabric.device(d).ok())
                    .filter(|d| d.segment == egress.segment && d.id != egress.id)
                    .ok_or(DropReason::Unreachable)?;
                Ok(Forwarding::Forward(Hop {
                    egress: egress.id,
                    ingress: peer.id,
                    next_node: peer.node,
                    delay_ns: self.segment_delay(egress.segment, size)?,
                    bearer: None,
                }))
            }
        }
    }

    fn uplink(
        &self,
        mobile: DeviceId,
        cell: SegmentId,
        dgram: &Datagram,
        size: u32,
    ) -> Result<Forwarding, DropReason> {
        let bearer = self
            .cellular
            .classify(
                mobile,
                FlowDirection::Uplink,
                *dgram.dst.ip(),
                dgram.dst.port(),
                dgram.src.port(),
            )
            .ok_or(DropReason::NoBearer)?;
        let core = self.cellular.packet_core().ok_or(DropReason::NoRoute)?;
        let backhaul = core
            .backhaul(bearer.base_station)
            .ok_or(DropReason::Unreachable)?;
        let delay_ns =
            self.segment_delay(cell, size)? + self.segment_delay(backhaul.segment, size)?;
        Ok(Forwarding::Forward(Hop {
            egress: mobile,
            ingress: core.tunnel(),
            next_node: core.gateway(),
            delay_ns,
            bearer: Some(bearer.eps_id),
        }))
    }

    fn downlink(
        &self,
        tunnel: DeviceId,
        cell: SegmentId,
        next_ip: Ipv4Addr,
        dgram: &Datagram,
        size: u32,
    ) -> Result<Forwarding, DropReason> {
        let mobile = self
            .addrs
            .device_for(next_ip)
            .and_then(|d| self.fabric.device(d).ok())
            .filter(|d| d.segment == cell && d.role == DeviceRole::MobileStation)
            .ok_or(DropReason::Unreachable)?;
        let bearer = self
            .cellular
            .classify(
                mobile.id,
                FlowDirection::Downlink,
                *dgram.src.ip(),
                dgram.src.port(),
                dgram.dst.port(),
            )
            .ok_or(DropReason::NoBearer)?;
        let core = self.cellular.packet_core().ok_or(DropReason::NoRoute)?;
        let backhaul = core
            .backhaul(bearer.base_station)
            .ok_or(DropReason::Unreachable)?;
        let delay_ns =
            self.segment_delay(backhaul.segment, size)? + self.segment_delay(cell, size)?;
        Ok(Forwarding::Forward(Hop {
            egress: tunnel,
            ingress: mobile.id,
            next_node: mobile.node,
            delay_ns,
            bearer: Some(bearer.eps_id),
        }))
    }

    /// Walk the path a datagram of `payload` bytes would take from `from`,
    /// returning the visited nodes up to the one that accepts it
    pub fn trace_path(
        &self,
        from: NodeId,
        src_port: u16,
        destination: SocketAddrV4,
        payload: u32,
    ) -> Result<Vec<NodeId>, DropReason> {
        let src_ip = self
            .source_address(from, *destination.ip())
            .ok_or(DropReason::NoRoute)?;
        let mut dgram = Datagram {
            id: 0,
            app: AppId::from_index(0),
            kind: DatagramKind::Data,
            src: SocketAddrV4::new(src_ip, src_port),
            dst: destination,
            payload,
            seq: 0,
            sent_at: SimTime::ZERO,
            ttl: DEFAULT_TTL,
        };
        let mut path = vec![from];
        let mut node = from;
        loop {
            match self.forward(node, &dgram)? {
                Forwarding::Deliver => return Ok(path),
                Forwarding::Forward(hop) => {
                    node = hop.next_node;
                    path.push(node);
                    if self.is_local(node, *destination.ip()) {
                        return Ok(path);
                    }
                    dgram.ttl = dgram.ttl.saturating_sub(1);
                    if dgram.ttl == 0 {
                        return Err(DropReason::TtlExpired);
                    }
                }
            }
        }
    }
}

/// Events of the run phase
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    Start(AppId),
    Stop(AppId),
    Send(AppId),
    Arrive {
        node: NodeId,
        ingress: DeviceId,
        dgram: Datagram,
    },
    /// Index into the mobility assigner's course changes
    CourseChange(usize),
}

#[derive(Debug, Default)]
struct AppRuntime {
    active: bool,
    /// Set by the start event and never cleared
    started: bool,
    next_seq: u32,
    pending_send: Option<EventId>,
    stats: AppStats,
}

/// What a run leaves behind
#[derive(Debug)]
pub struct RunOutput {
    pub stats: Vec<AppStats>,
    pub drops: BTreeMap<DropReason, u64>,
    pub positions: BTreeMap<NodeId, Vector>,
    pub trace_entries: u64,
}

/// Drives applications and packets over a frozen topology
pub struct NetworkRuntime<'a> {
    topology: &'a Topology,
    traffic: &'a TrafficOrchestrator,
    mobility: MobilityAssigner,
    apps: Vec<AppRuntime>,
    drops: BTreeMap<DropReason, u64>,
    next_packet_id: u64,
    trace: Option<TraceRecorder>,
    pcap: Option<PcapSet>,
    error: Option<TraceError>,
}

impl<'a> NetworkRuntime<'a> {
    pub fn new(topology: &'a Topology, traffic: &'a TrafficOrchestrator) -> Self {
        let apps = traffic.apps().iter().map(|_| AppRuntime::default()).collect();
        Self {
            topology,
            traffic,
            mobility: topology.mobility.clone(),
            apps,
            drops: BTreeMap::new(),
            next_packet_id: 0,
            trace: None,
            pcap: None,
            error: None,
        }
    }

    pub fn with_trace(mut self, recorder: TraceRecorder) -> Self {
        self.trace = Some(recorder);
        self
    }

    pub fn with_pcap(mut self, pcap: PcapSet) -> Self {
        self.pcap = Some(pcap);
        self
    }

    pub fn record(&mut self, entry: TraceEntry) {
        if let Some(recorder) = &mut self.trace {
            if let Err(e) = recorder.record(&entry) {
                self.error.get_or_insert(e);
            }
        }
    }

    fn capture(&mut self, device: DeviceId, at: SimTime, dgram: &Datagram) {
        if let Some(pcap) = &mut self.pcap {
            if let Err(e) = pcap.write(device, at, dgram) {
                self.error.get_or_insert(e);
            }
        }
    }

    fn drop_packet(&mut self, at: SimTime, node: NodeId, dgram: &Datagram, reason: DropReason) {
        trace!("{} dropped at {}: {}", dgram.id, node, reason);
        *self.drops.entry(reason).or_insert(0) += 1;
        self.record(
            TraceEntry::new(
                at,
                events::PACKET_DROP,
                json!({"packet": dgram.id, "app": dgram.app, "reason": reason}),
            )
            .with_node(node),
        );
    }

    fn start(&mut self, ctx: &mut EngineContext<'_, NetEvent>, id: AppId) {
        let traffic = self.traffic;
        let Some(app) = traffic.app(id) else {
            return;
        };
        let node = app.node();
        if let Some(rt) = self.apps.get_mut(id.index()) {
            rt.active = true;
            rt.started = true;
            if app.source().is_some() {
                rt.pending_send = Some(ctx.schedule_after(0, NetEvent::Send(id)));
            }
        }
        debug!("{} started on {} at {}", id, node, ctx.now());
        self.record(
            TraceEntry::new(ctx.now(), events::APP_START, json!({"app": id, "kind": app.kind}))
                .with_node(node),
        );
    }

    fn stop(&mut self, ctx: &mut EngineContext<'_, NetEvent>, id: AppId) {
        let Some(app) = self.traffic.app(id) else {
            return;
        };
        if let Some(rt) = self.apps.get_mut(id.index()) {
            rt.active = false;
            if let Some(pending) = rt.pending_send.take() {
                ctx.cancel(pending);
            }
        }
        debug!("{} stopped at {}", id, ctx.now());
        self.record(
            TraceEntry::new(ctx.now(), events::APP_STOP, json!({"app": id})).with_node(app.node()),
        );
    }

    fn send(&mut self, ctx: &mut EngineContext<'_, NetEvent>, id: AppId) {
        let now = ctx.now();
        let traffic = self.traffic;
        let Some((app, spec)) = traffic
            .app(id)
            .and_then(|a| a.source().map(|s| (a, s)))
        else {
            return;
        };
        let Some(rt) = self.apps.get_mut(id.index()) else {
            return;
        };
        rt.pending_send = None;
        if !rt.active || now > spec.send_deadline() {
            return;
        }
        if let SendLimit::Packets(max) = spec.limit {
            if rt.next_seq >= max {
                return;
            }
        }
        let seq = rt.next_seq;
        rt.next_seq += 1;
        rt.stats.record_sent();

        let next_at = now.plus(spec.interval);
        let more = match spec.limit {
            SendLimit::Packets(max) => rt.next_seq < max,
            SendLimit::Duration(_) => true,
        };
        if more && next_at <= spec.send_deadline() {
            rt.pending_send = Some(ctx.schedule_after(
                next_at.since(now).unwrap_or(0),
                NetEvent::Send(id),
            ));
        }

        let kind = match spec.protocol {
            Protocol::Udp => DatagramKind::Data,
            Protocol::UdpEcho => DatagramKind::EchoRequest,
        };
        let src_ip = self
            .topology
            .source_address(spec.node, *spec.destination.ip())
            .unwrap_or(Ipv4Addr::UNSPECIFIED);
        let dgram = Datagram {
            id: self.next_packet_id,
            app: id,
            kind,
            src: SocketAddrV4::new(src_ip, app.port),
            dst: spec.destination,
            payload: spec.packet_size,
            seq,
            sent_at: now,
            ttl: DEFAULT_TTL,
        };
        self.next_packet_id += 1;
        self.record(
            TraceEntry::new(
                now,
                events::PACKET_TX,
                json!({"packet": dgram.id, "app": id, "seq": seq, "dst": dgram.dst.to_string(), "bytes": dgram.payload}),
            )
            .with_node(spec.node),
        );
        self.transmit(ctx, spec.node, dgram);
    }

    fn transmit(&mut self, ctx: &mut EngineContext<'_, NetEvent>, node: NodeId, dgram: Datagram) {
        match self.topology.forward(node, &dgram) {
            Ok(Forwarding::Deliver) => self.deliver(ctx, node, dgram),
            Ok(Forwarding::Forward(hop)) => {
                self.capture(hop.egress, ctx.now(), &dgram);
                ctx.schedule_after(
                    hop.delay_ns,
                    NetEvent::Arrive {
                        node: hop.next_node,
                        ingress: hop.ingress,
                        dgram,
                    },
                );
            }
            Err(reason) => self.drop_packet(ctx.now(), node, &dgram, reason),
        }
    }

    fn arrive(
        &mut self,
        ctx: &mut EngineContext<'_, NetEvent>,
        node: NodeId,
        ingress: DeviceId,
        mut dgram: Datagram,
    ) {
        self.capture(ingress, ctx.now(), &dgram);
        if self.topology.is_local(node, *dgram.dst.ip()) {
            self.deliver(ctx, node, dgram);
            return;
        }
        dgram.ttl = dgram.ttl.saturating_sub(1);
        if dgram.ttl == 0 {
            self.drop_packet(ctx.now(), node, &dgram, DropReason::TtlExpired);
            return;
        }
        self.transmit(ctx, node, dgram);
    }

    fn deliver(&mut self, ctx: &mut EngineContext<'_, NetEvent>, node: NodeId, dgram: Datagram) {
        let now = ctx.now();
        if dgram.kind == DatagramKind::EchoReply {
            let client = self
                .traffic
                .source_at(node, dgram.dst.port())
                .map(|a| a.id)
                .filter(|id| self.apps.get(id.index()).is_some_and(|rt| rt.active));
            match client {
                Some(id) => {
                    if let Some(rt) = self.apps.get_mut(id.index()) {
                        rt.stats.record_echo(now.since(dgram.sent_at).unwrap_or(0));
                    }
                    self.record_rx(now, node, id, &dgram);
                }
                None => self.drop_packet(now, node, &dgram, DropReason::NoListener),
            }
            return;
        }

        let traffic = self.traffic;
        // Stop events run before arrivals at the same instant, so the
        // closed window decides, not the active flag
        let listener = traffic
            .listener(node, dgram.dst.port())
            .filter(|a| a.sink().is_some_and(|s| s.accepts_at(now)))
            .filter(|a| self.apps.get(a.id.index()).is_some_and(|rt| rt.started));
        let Some(app) = listener else {
            self.drop_packet(now, node, &dgram, DropReason::NoListener);
            return;
        };
        let (id, kind) = (app.id, app.kind);
        if let Some(rt) = self.apps.get_mut(id.index()) {
            rt.stats.record_received(now, dgram.seq, dgram.payload);
        }
        self.record_rx(now, node, id, &dgram);

        if kind == AppKind::EchoServer && dgram.kind == DatagramKind::EchoRequest {
            let reply = Datagram {
                id: self.next_packet_id,
                app: id,
                kind: DatagramKind::EchoReply,
                src: dgram.dst,
                dst: dgram.src,
                payload: dgram.payload,
                seq: dgram.seq,
                sent_at: dgram.sent_at,
                ttl: DEFAULT_TTL,
            };
            self.next_packet_id += 1;
            if let Some(rt) = self.apps.get_mut(id.index()) {
                rt.stats.record_sent();
            }
            self.transmit(ctx, node, reply);
        }
    }

    fn record_rx(&mut self, at: SimTime, node: NodeId, app: AppId, dgram: &Datagram) {
        self.record(
            TraceEntry::new(
                at,
                events::PACKET_RX,
                json!({
                    "packet": dgram.id,
                    "app": app,
                    "seq": dgram.seq,
                    "src": dgram.src.to_string(),
                    "delay_ns": at.since(dgram.sent_at).unwrap_or(0),
                }),
            )
            .with_node(node),
        );
    }

    fn course_change(&mut self, at: SimTime, index: usize) {
        let Some(change) = self.topology.mobility.course_changes().get(index).cloned() else {
            return;
        };
        if let Err(e) = self.mobility.apply_course_change(&change) {
            debug!("Course change {} ignored: {}", index, e);
            return;
        }
        let position = self.mobility.position_at(change.node, at);
        self.record(
            TraceEntry::new(
                at,
                events::COURSE_CHANGE,
                json!({"velocity": change.velocity, "position": position}),
            )
            .with_node(change.node),
        );
    }

    /// Flush output files and collect counters
    pub fn finish(self, at: SimTime) -> Result<RunOutput, TraceError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let trace_entries = match self.trace {
            Some(recorder) => recorder.close()?,
            None => 0,
        };
        if let Some(pcap) = self.pcap {
            pcap.finish()?;
        }
        let positions = self
            .mobility
            .states()
            .iter()
            .map(|(node, state)| (*node, state.position_at(at)))
            .collect();
        Ok(RunOutput {
            stats: self.apps.into_iter().map(|rt| rt.stats).collect(),
            drops: self.drops,
            positions,
            trace_entries,
        })
    }
}

impl EventHandler<NetEvent> for NetworkRuntime<'_> {
    fn handle(&mut self, ctx: &mut EngineContext<'_, NetEvent>, event: NetEvent) {
        match event {
            NetEvent::Start(id) => self.start(ctx, id),
            NetEvent::Stop(id) => self.stop(ctx, id),
            NetEvent::Send(id) => self.send(ctx, id),
            NetEvent::Arrive {
                node,
                ingress,
                dgram,
            } => self.arrive(ctx, node, ingress, dgram),
            NetEvent::CourseChange(index) => self.course_change(ctx.now(), index),
        }
    }
}
