//! Traffic orchestration
//!
//! Source and sink applications with explicit start/stop offsets. Each
//! application is independent: no send or receive state is shared, and a
//! flow's stop time cancels its own pending send timer only.

use crate::node::{NodeError, NodeId, NodeRegistry};
use crate::time::SimTime;
use serde::Serialize;
use std::fmt;
use std::net::SocketAddrV4;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Largest UDP payload carried in one IPv4 datagram
pub const MAX_PAYLOAD: u32 = 65_507;
/// First ephemeral port handed to sources
pub const EPHEMERAL_BASE: u16 = 49_153;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrafficError {
    #[error("Application window start {start} must precede stop {stop}")]
    InvalidWindow { start: SimTime, stop: SimTime },

    #[error("Send interval must be positive")]
    ZeroInterval,

    #[error("Packet size {0} outside 1..=65507")]
    InvalidPacketSize(u32),

    #[error("Send limit must allow at least one packet")]
    EmptyLimit,

    #[error("Node {node} already listens on port {port}")]
    DuplicateListener { node: NodeId, port: u16 },

    #[error("{app} touches {node} and starts at {start}, before setup completes")]
    StartsBeforeSetup {
        app: AppId,
        node: NodeId,
        start: SimTime,
    },

    #[error("{app} touches {node} whose {missing} is not set up")]
    SetupIncomplete {
        app: AppId,
        node: NodeId,
        missing: &'static str,
    },

    #[error("Too many sources, ephemeral ports exhausted")]
    PortsExhausted,

    #[error(transparent)]
    Node(#[from] NodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct AppId(u32);

impl AppId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "app{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    /// One-way datagrams counted by a sink
    Udp,
    /// Request/reply, the server returns each datagram to its sender
    UdpEcho,
}

/// When a source stops sending, besides its stop time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendLimit {
    Packets(u32),
    Duration(Duration),
}

/// A traffic source
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceSpec {
    pub node: NodeId,
    pub destination: SocketAddrV4,
    pub protocol: Protocol,
    pub interval: Duration,
    /// UDP payload bytes
    pub packet_size: u32,
    pub limit: SendLimit,
    pub start: SimTime,
    pub stop: SimTime,
}

impl SourceSpec {
    pub fn new(node: NodeId, destination: SocketAddrV4, protocol: Protocol) -> Self {
        Self {
            node,
            destination,
            protocol,
            interval: Duration::from_secs(1),
            packet_size: 1024,
            limit: SendLimit::Packets(1),
            start: SimTime::ZERO,
            stop: SimTime::ZERO,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Derive the interval from a bit rate at the current packet size
    pub fn rate_bps(mut self, bps: u64) -> Self {
        let bits = self.packet_size as u128 * 8;
        let nanos = (bits * 1_000_000_000) / (bps.max(1) as u128);
        self.interval = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        self
    }

    pub fn packet_size(mut self, bytes: u32) -> Self {
        self.packet_size = bytes;
        self
    }

    pub fn max_packets(mut self, count: u32) -> Self {
        self.limit = SendLimit::Packets(count);
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.limit = SendLimit::Duration(duration);
        self
    }

    pub fn active(mut self, start: SimTime, stop: SimTime) -> Self {
        self.start = start;
        self.stop = stop;
        self
    }

    /// Last instant a packet may be sent
    pub fn send_deadline(&self) -> SimTime {
        match self.limit {
            SendLimit::Packets(_) => self.stop,
            SendLimit::Duration(d) => self.start.plus(d).min(self.stop),
        }
    }
}

/// A listening application
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkSpec {
    pub node: NodeId,
    pub port: u16,
    pub protocol: Protocol,
    pub start: SimTime,
    pub stop: SimTime,
}

impl SinkSpec {
    pub fn new(node: NodeId, port: u16, protocol: Protocol) -> Self {
        Self {
            node,
            port,
            protocol,
            start: SimTime::ZERO,
            stop: SimTime::ZERO,
        }
    }

    pub fn active(mut self, start: SimTime, stop: SimTime) -> Self {
        self.start = start;
        self.stop = stop;
        self
    }

    /// Whether a datagram arriving at `at` is accepted
    pub fn accepts_at(&self, at: SimTime) -> bool {
        self.start <= at && at <= self.stop
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    UdpClient,
    EchoClient,
    PacketSink,
    EchoServer,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AppSpec {
    Source(SourceSpec),
    Sink(SinkSpec),
}

/// An installed application
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct App {
    pub id: AppId,
    pub kind: AppKind,
    /// Local port: the listen port of a sink, the ephemeral port of a source
    pub port: u16,
    pub spec: AppSpec,
}

impl App {
    pub fn node(&self) -> NodeId {
        match &self.spec {
            AppSpec::Source(s) => s.node,
            AppSpec::Sink(s) => s.node,
        }
    }

    pub fn start(&self) -> SimTime {
        match &self.spec {
            AppSpec::Source(s) => s.start,
            AppSpec::Sink(s) => s.start,
        }
    }

    pub fn stop(&self) -> SimTime {
        match &self.spec {
            AppSpec::Source(s) => s.stop,
            AppSpec::Sink(s) => s.stop,
        }
    }

    pub fn source(&self) -> Option<&SourceSpec> {
        match &self.spec {
            AppSpec::Source(s) => Some(s),
            AppSpec::Sink(_) => None,
        }
    }

    pub fn sink(&self) -> Option<&SinkSpec> {
        match &self.spec {
            AppSpec::Sink(s) => Some(s),
            AppSpec::Source(_) => None,
        }
    }
}

/// All applications of a scenario, in installation order
#[derive(Debug, Clone, Default)]
pub struct TrafficOrchestrator {
    apps: Vec<App>,
    next_ephemeral: u16,
}

fn check_window(start: SimTime, stop: SimTime) -> Result<(), TrafficError> {
    if start >= stop {
        return Err(TrafficError::InvalidWindow { start, stop });
    }
    Ok(())
}

impl TrafficOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install_source(
        &mut self,
        registry: &NodeRegistry,
        spec: SourceSpec,
    ) -> Result<AppId, TrafficError> {
        registry.require_stack(spec.node)?;
        check_window(spec.start, spec.stop)?;
        if spec.interval.is_zero() {
            return Err(TrafficError::ZeroInterval);
        }
        if spec.packet_size == 0 || spec.packet_size > MAX_PAYLOAD {
            return Err(TrafficError::InvalidPacketSize(spec.packet_size));
        }
        match spec.limit {
            SendLimit::Packets(0) => return Err(TrafficError::EmptyLimit),
            SendLimit::Duration(d) if d.is_zero() => return Err(TrafficError::EmptyLimit),
            _ => {}
        }
        let port = EPHEMERAL_BASE
            .checked_add(self.next_ephemeral)
            .ok_or(TrafficError::PortsExhausted)?;
        self.next_ephemeral += 1;

        let kind = match spec.protocol {
            Protocol::Udp => AppKind::UdpClient,
            Protocol::UdpEcho => AppKind::EchoClient,
        };
        let id = AppId(self.apps.len() as u32);
        debug!(
            "{} {:?} on {} -> {} from {} to {}",
            id, kind, spec.node, spec.destination, spec.start, spec.stop
        );
        self.apps.push(App {
            id,
            kind,
            port,
            spec: AppSpec::Source(spec),
        });
        Ok(id)
    }

    pub fn install_sink(
        &mut self,
        registry: &NodeRegistry,
        spec: SinkSpec,
    ) -> Result<AppId, TrafficError> {
        registry.require_stack(spec.node)?;
        check_window(spec.start, spec.stop)?;
        if self.listener(spec.node, spec.port).is_some() {
            return Err(TrafficError::DuplicateListener {
                node: spec.node,
                port: spec.port,
            });
        }
        let kind = match spec.protocol {
            Protocol::Udp => AppKind::PacketSink,
            Protocol::UdpEcho => AppKind::EchoServer,
        };
        let id = AppId(self.apps.len() as u32);
        debug!(
            "{} {:?} on {} port {} from {} to {}",
            id, kind, spec.node, spec.port, spec.start, spec.stop
        );
        self.apps.push(App {
            id,
            kind,
            port: spec.port,
            spec: AppSpec::Sink(spec),
        });
        Ok(id)
    }

    /// Sink or echo server bound to `node:port`
    pub fn listener(&self, node: NodeId, port: u16) -> Option<&App> {
        self.apps
            .iter()
            .find(|a| a.sink().is_some_and(|s| s.node == node && s.port == port))
    }

    /// Source bound to the ephemeral `node:port`
    pub fn source_at(&self, node: NodeId, port: u16) -> Option<&App> {
        self.apps
            .iter()
            .find(|a| a.source().is_some_and(|s| s.node == node) && a.port == port)
    }

    pub fn app(&self, id: AppId) -> Option<&App> {
        self.apps.get(id.index())
    }

    pub fn apps(&self) -> &[App] {
        &self.apps
    }

    pub fn sources(&self) -> impl Iterator<Item = &App> + '_ {
        self.apps.iter().filter(|a| a.source().is_some())
    }

    pub fn sinks(&self) -> impl Iterator<Item = &App> + '_ {
        self.apps.iter().filter(|a| a.sink().is_some())
    }
}

/// Counters of one application after a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppStats {
    pub sent: u64,
    pub received: u64,
    pub bytes_received: u64,
    pub first_rx: Option<SimTime>,
    pub last_rx: Option<SimTime>,
    /// Sequence numbers skipped below the highest one seen
    pub lost: u64,
    pub echo_replies: u64,
    pub rtt_min_ns: Option<u64>,
    pub rtt_max_ns: Option<u64>,
    pub rtt_mean_ns: Option<u64>,
    #[serde(skip)]
    highest_seq: Option<u32>,
    #[serde(skip)]
    rtt_sum_ns: u128,
}

impl AppStats {
    pub fn record_sent(&mut self) {
        self.sent += 1;
    }

    pub fn record_received(&mut self, at: SimTime, seq: u32, bytes: u32) {
        self.received += 1;
        self.bytes_received += bytes as u64;
        self.first_rx.get_or_insert(at);
        self.last_rx = Some(at);
        if self.highest_seq.map_or(true, |h| seq > h) {
            self.highest_seq = Some(seq);
        }
        let expected = self.highest_seq.map_or(0, |h| h as u64 + 1);
        self.lost = expected.saturating_sub(self.received);
    }

    pub fn record_echo(&mut self, rtt_ns: u64) {
        self.echo_replies += 1;
        self.rtt_sum_ns += rtt_ns as u128;
        self.rtt_min_ns = Some(self.rtt_min_ns.map_or(rtt_ns, |m| m.min(rtt_ns)));
        self.rtt_max_ns = Some(self.rtt_max_ns.map_or(rtt_ns, |m| m.max(rtt_ns)));
        self.rtt_mean_ns = u64::try_from(self.rtt_sum_ns / self.echo_replies as u128).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeRole;
    use std::net::Ipv4Addr;

    fn registry() -> (NodeRegistry, NodeId, NodeId) {
        let mut registry = NodeRegistry::new();
        let nodes = registry.create(NodeRole::Peer, 2);
        registry.install_stack(&nodes).unwrap();
        (registry, nodes.get(0).unwrap(), nodes.get(1).unwrap())
    }

    fn dest() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(11, 1, 2, 2), 9)
    }

    #[test]
    fn test_window_must_be_ordered() {
        let (registry, a, _) = registry();
        let mut traffic = TrafficOrchestrator::new();
        let spec = SourceSpec::new(a, dest(), Protocol::Udp)
            .active(SimTime::from_secs(2), SimTime::from_secs(2));
        assert_eq!(
            traffic.install_source(&registry, spec),
            Err(TrafficError::InvalidWindow {
                start: SimTime::from_secs(2),
                stop: SimTime::from_secs(2)
            })
        );
        let sink = SinkSpec::new(a, 9, Protocol::Udp)
            .active(SimTime::from_secs(3), SimTime::from_secs(1));
        assert!(traffic.install_sink(&registry, sink).is_err());
        assert!(traffic.apps().is_empty());
    }

    #[test]
    fn test_duplicate_listener_rejected() {
        let (registry, a, b) = registry();
        let mut traffic = TrafficOrchestrator::new();
        let window = (SimTime::ZERO, SimTime::from_secs(1));
        traffic
            .install_sink(&registry, SinkSpec::new(a, 9, Protocol::UdpEcho).active(window.0, window.1))
            .unwrap();
        // Same port on another node is fine
        traffic
            .install_sink(&registry, SinkSpec::new(b, 9, Protocol::Udp).active(window.0, window.1))
            .unwrap();
        let err = traffic
            .install_sink(&registry, SinkSpec::new(a, 9, Protocol::Udp).active(window.0, window.1))
            .unwrap_err();
        assert_eq!(err, TrafficError::DuplicateListener { node: a, port: 9 });
    }

    #[test]
    fn test_sources_get_distinct_ports() {
        let (registry, a, _) = registry();
        let mut traffic = TrafficOrchestrator::new();
        let window = (SimTime::from_millis(500), SimTime::from_millis(1100));
        let first = traffic
            .install_source(
                &registry,
                SourceSpec::new(a, dest(), Protocol::Udp).active(window.0, window.1),
            )
            .unwrap();
        let second = traffic
            .install_source(
                &registry,
                SourceSpec::new(a, dest(), Protocol::UdpEcho).active(window.0, window.1),
            )
            .unwrap();
        assert_eq!(traffic.app(first).unwrap().port, EPHEMERAL_BASE);
        assert_eq!(traffic.app(second).unwrap().kind, AppKind::EchoClient);
        assert_eq!(traffic.source_at(a, EPHEMERAL_BASE + 1).unwrap().id, second);
    }

    #[test]
    fn test_invalid_source_parameters() {
        let (registry, a, _) = registry();
        let mut traffic = TrafficOrchestrator::new();
        let base = SourceSpec::new(a, dest(), Protocol::Udp)
            .active(SimTime::ZERO, SimTime::from_secs(1));
        assert_eq!(
            traffic.install_source(&registry, base.clone().interval(Duration::ZERO)),
            Err(TrafficError::ZeroInterval)
        );
        assert_eq!(
            traffic.install_source(&registry, base.clone().packet_size(70_000)),
            Err(TrafficError::InvalidPacketSize(70_000))
        );
        assert_eq!(
            traffic.install_source(&registry, base.max_packets(0)),
            Err(TrafficError::EmptyLimit)
        );
    }

    #[test]
    fn test_rate_and_duration_limits() {
        let (_, a, _) = registry();
        let spec = SourceSpec::new(a, dest(), Protocol::Udp)
            .packet_size(1250)
            .rate_bps(1_000_000)
            .duration(Duration::from_secs(3))
            .active(SimTime::from_secs(1), SimTime::from_secs(10));
        // 10_000 bits at 1 Mb/s
        assert_eq!(spec.interval, Duration::from_millis(10));
        assert_eq!(spec.send_deadline(), SimTime::from_secs(4));
    }

    #[test]
    fn test_loss_from_sequence_gaps() {
        let mut stats = AppStats::default();
        stats.record_received(SimTime::from_millis(1), 0, 100);
        stats.record_received(SimTime::from_millis(2), 3, 100);
        assert_eq!(stats.lost, 2);
        stats.record_received(SimTime::from_millis(3), 1, 100);
        assert_eq!(stats.lost, 1);
        assert_eq!(stats.first_rx, Some(SimTime::from_millis(1)));
        assert_eq!(stats.last_rx, Some(SimTime::from_millis(3)));

        stats.record_echo(10);
        stats.record_echo(30);
        assert_eq!(stats.rtt_mean_ns, Some(20));
        assert_eq!(stats.rtt_min_ns, Some(10));
    }
}
