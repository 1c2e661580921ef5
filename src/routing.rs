//! Static, default and globally populated routes
//!
//! Every node has a table of explicit route entries. Connected routes are
//! implied by the node's addressed devices and never stored. Lookup is
//! longest-prefix match; on equal prefix length connected beats static,
//! static beats default and default beats global.

use crate::addr::{normalize, AddrError, AddressAssembler};
use crate::link::{DeviceId, DeviceRole, LinkFabric, LinkKind, SegmentId};
use crate::node::{NodeId, NodeRegistry};
use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::Ipv4Addr;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteOrigin {
    Connected,
    Static,
    Default,
    Global,
}

impl RouteOrigin {
    fn precedence(self) -> u8 {
        match self {
            RouteOrigin::Connected => 3,
            RouteOrigin::Static => 2,
            RouteOrigin::Default => 1,
            RouteOrigin::Global => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub node: NodeId,
    pub destination: Ipv4Network,
    /// `None` when the destination is on-link
    pub next_hop: Option<Ipv4Addr>,
    pub egress: DeviceId,
    pub origin: RouteOrigin,
}

/// Per-node route tables
#[derive(Debug, Clone, Default)]
pub struct RoutingTables {
    tables: BTreeMap<NodeId, Vec<RouteEntry>>,
}

impl RoutingTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a static route entry
    pub fn install_route(
        &mut self,
        fabric: &LinkFabric,
        addrs: &AddressAssembler,
        node: NodeId,
        destination: Ipv4Network,
        next_hop: Option<Ipv4Addr>,
        egress: DeviceId,
    ) -> Result<(), AddrError> {
        self.check_egress(fabric, addrs, node, next_hop, egress)?;
        let entry = RouteEntry {
            node,
            destination: normalize(destination),
            next_hop,
            egress,
            origin: RouteOrigin::Static,
        };
        debug!(
            "Route on {}: {} via {:?} dev {}",
            node, entry.destination, next_hop, egress
        );
        self.tables.entry(node).or_default().push(entry);
        Ok(())
    }

    /// Set the node's single default route, replacing a previous one
    pub fn install_default_route(
        &mut self,
        fabric: &LinkFabric,
        addrs: &AddressAssembler,
        node: NodeId,
        gateway: Ipv4Addr,
        egress: DeviceId,
    ) -> Result<(), AddrError> {
        self.check_egress(fabric, addrs, node, Some(gateway), egress)?;
        let table = self.tables.entry(node).or_default();
        table.retain(|r| r.origin != RouteOrigin::Default);
        table.push(RouteEntry {
            node,
            destination: Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0)
                .map_err(|e| AddrError::InvalidConfig(e.to_string()))?,
            next_hop: Some(gateway),
            egress,
            origin: RouteOrigin::Default,
        });
        debug!("Default route on {} via {} dev {}", node, gateway, egress);
        Ok(())
    }

    fn check_egress(
        &self,
        fabric: &LinkFabric,
        addrs: &AddressAssembler,
        node: NodeId,
        next_hop: Option<Ipv4Addr>,
        egress: DeviceId,
    ) -> Result<(), AddrError> {
        let device = fabric.device(egress)?;
        if device.node != node {
            return Err(AddrError::ForeignDevice {
                device: egress,
                node,
            });
        }
        let iface = addrs
            .interface(egress)
            .ok_or(AddrError::Unaddressed(egress))?;
        if let Some(next_hop) = next_hop {
            if !iface.contains(next_hop) {
                return Err(AddrError::NextHopOffLink {
                    next_hop,
                    egress,
                    network: normalize(iface),
                });
            }
        }
        Ok(())
    }

    /// Stored entries of a node (connected routes excluded)
    pub fn routes(&self, node: NodeId) -> &[RouteEntry] {
        self.tables.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_routes(&self, node: NodeId) -> bool {
        !self.routes(node).is_empty()
    }

    /// Longest-prefix match over connected and stored routes
    pub fn lookup(
        &self,
        fabric: &LinkFabric,
        addrs: &AddressAssembler,
        node: NodeId,
        destination: Ipv4Addr,
    ) -> Option<RouteEntry> {
        let connected = fabric.devices_of(node).iter().filter_map(|dev| {
            addrs.interface(*dev).map(|iface| RouteEntry {
                node,
                destination: normalize(iface),
                next_hop: None,
                egress: *dev,
                origin: RouteOrigin::Connected,
            })
        });
        let stored = self.routes(node).iter().cloned();

        let mut best: Option<RouteEntry> = None;
        for entry in connected.chain(stored) {
            if !entry.destination.contains(destination) {
                continue;
            }
            let better = match &best {
                None => true,
                Some(current) => {
                    (entry.destination.prefix(), entry.origin.precedence())
                        > (current.destination.prefix(), current.origin.precedence())
                }
            };
            if better {
                best = Some(entry);
            }
        }
        best
    }

    /// Compute shortest-path routes between every statically addressed node
    /// over the segments built so far, replacing earlier global routes.
    ///
    /// Cellular segments carry no transit; their prefix is reached through
    /// the gateway's tunnel device. Nothing is installed if any covered node
    /// sits on a segment that is not addressed yet.
    pub fn populate_global_routes(
        &mut self,
        registry: &NodeRegistry,
        fabric: &LinkFabric,
        addrs: &AddressAssembler,
    ) -> Result<usize, AddrError> {
        let covered: BTreeSet<NodeId> = registry
            .ids()
            .filter(|n| registry.has_stack(*n))
            .filter(|n| {
                fabric.devices_of(*n).iter().any(|d| {
                    addrs.is_addressed(*d)
                        && fabric
                            .device(*d)
                            .is_ok_and(|dev| dev.kind != LinkKind::CellularAccess || dev.role == DeviceRole::Tunnel)
                })
            })
            .collect();

        // Adjacency: node -> [(egress, neighbour, neighbour address)]
        let mut adjacency: BTreeMap<NodeId, Vec<(DeviceId, NodeId, Ipv4Addr)>> = BTreeMap::new();
        for node in &covered {
            let mut edges = Vec::new();
            for dev in fabric.devices_of(*node) {
                let device = fabric.device(*dev)?;
                if device.kind == LinkKind::CellularAccess {
                    continue;
                }
                if !addrs.is_addressed(*dev) {
                    return Err(AddrError::Unaddressed(*dev));
                }
                let segment = fabric.segment(device.segment)?;
                for peer in &segment.devices {
                    let peer_dev = fabric.device(*peer)?;
                    if peer_dev.node == *node {
                        continue;
                    }
                    let ip = addrs.address_of(*peer).ok_or(AddrError::Unaddressed(*peer))?;
                    edges.push((*dev, peer_dev.node, ip));
                }
            }
            adjacency.insert(*node, edges);
        }

        // Destination prefix -> nodes attached to it
        let mut attached: Vec<(Ipv4Network, SegmentId, BTreeSet<NodeId>)> = Vec::new();
        for block in addrs.blocks() {
            let segment = fabric.segment(block.segment)?;
            let nodes: BTreeSet<NodeId> = segment
                .devices
                .iter()
                .filter_map(|d| fabric.device(*d).ok())
                .filter(|d| d.kind != LinkKind::CellularAccess || d.role == DeviceRole::Tunnel)
                .map(|d| d.node)
                .filter(|n| covered.contains(n))
                .collect();
            attached.push((block.prefix, block.segment, nodes));
        }

        let mut computed: Vec<RouteEntry> = Vec::new();
        for source in &covered {
            let first_hops = shortest_first_hops(*source, &adjacency);
            for (prefix, _segment, nodes) in &attached {
                if nodes.contains(source) {
                    continue;
                }
                // Nearest attached node, ties broken by node id
                let target = nodes
                    .iter()
                    .filter_map(|n| first_hops.get(n).map(|(dist, hop)| (*dist, *n, *hop)))
                    .min_by_key(|(dist, n, _)| (*dist, *n));
                if let Some((_, _, (egress, next_hop))) = target {
                    computed.push(RouteEntry {
                        node: *source,
                        destination: *prefix,
                        next_hop: Some(next_hop),
                        egress,
                        origin: RouteOrigin::Global,
                    });
                }
            }
        }

        for table in self.tables.values_mut() {
            table.retain(|r| r.origin != RouteOrigin::Global);
        }
        let count = computed.len();
        for entry in computed {
            self.tables.entry(entry.node).or_default().push(entry);
        }
        info!(
            "Populated {} global routes across {} nodes",
            count,
            covered.len()
        );
        Ok(count)
    }
}

/// BFS from `source`; for each reached node, hop distance and the first hop
/// (egress device, next-hop address) taken from `source`
fn shortest_first_hops(
    source: NodeId,
    adjacency: &BTreeMap<NodeId, Vec<(DeviceId, NodeId, Ipv4Addr)>>,
) -> BTreeMap<NodeId, (u32, (DeviceId, Ipv4Addr))> {
    let mut reached: BTreeMap<NodeId, (u32, (DeviceId, Ipv4Addr))> = BTreeMap::new();
    let mut visited = BTreeSet::from([source]);
    let mut queue = VecDeque::new();

    for (egress, peer, ip) in adjacency.get(&source).into_iter().flatten() {
        if visited.insert(*peer) {
            reached.insert(*peer, (1, (*egress, *ip)));
            queue.push_back(*peer);
        }
    }
    while let Some(node) = queue.pop_front() {
        let Some(&(dist, hop)) = reached.get(&node) else {
            continue;
        };
        for (_, peer, _) in adjacency.get(&node).into_iter().flatten() {
            if visited.insert(*peer) {
                reached.insert(*peer, (dist + 1, hop));
                queue.push_back(*peer);
            }
        }
    }
    reached
}
