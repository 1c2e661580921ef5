//! Link fabric builder
//!
//! Creates link segments of the five supported technologies and one device
//! per node on each. A node may hold devices on any number of segments,
//! which is how heterogeneous topologies are stitched together. Segment
//! membership never changes after a device is created.

use crate::node::{NodeError, NodeId, NodeRegistry, NodeSet};
use scenarios::{LinkProfile, LinkProfiles};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FabricError {
    #[error("Unsupported link kind '{0}'")]
    UnsupportedLinkKind(String),

    #[error("Cannot create a {0} segment with zero nodes")]
    EmptySegment(LinkKind),

    #[error("Point-to-point segment needs exactly 2 nodes, got {0}")]
    PointToPointArity(usize),

    #[error("Device role {role:?} is not valid on a {kind} segment")]
    RoleMismatch { kind: LinkKind, role: DeviceRole },

    #[error("Node {node} already has a device on segment {segment}")]
    DuplicateMember { node: NodeId, segment: SegmentId },

    #[error("Segment {0} is already addressed and cannot take new devices")]
    SegmentSealed(SegmentId),

    #[error("Unknown segment {0}")]
    UnknownSegment(SegmentId),

    #[error("Unknown device {0}")]
    UnknownDevice(DeviceId),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Supported link technologies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    PointToPoint,
    SharedMedia,
    WirelessLan,
    Vehicular,
    CellularAccess,
}

impl LinkKind {
    pub const ALL: [LinkKind; 5] = [
        LinkKind::PointToPoint,
        LinkKind::SharedMedia,
        LinkKind::WirelessLan,
        LinkKind::Vehicular,
        LinkKind::CellularAccess,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            LinkKind::PointToPoint => "p2p",
            LinkKind::SharedMedia => "csma",
            LinkKind::WirelessLan => "wifi",
            LinkKind::Vehicular => "wave",
            LinkKind::CellularAccess => "lte",
        }
    }

    fn accepts(self, role: DeviceRole) -> bool {
        match self {
            LinkKind::PointToPoint | LinkKind::SharedMedia | LinkKind::Vehicular => {
                role == DeviceRole::Plain
            }
            // Plain means ad-hoc on a wireless LAN
            LinkKind::WirelessLan => matches!(
                role,
                DeviceRole::Plain | DeviceRole::AccessPoint | DeviceRole::Station
            ),
            LinkKind::CellularAccess => matches!(
                role,
                DeviceRole::BaseStation | DeviceRole::MobileStation | DeviceRole::Tunnel
            ),
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for LinkKind {
    type Err = FabricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "p2p" | "point-to-point" | "point_to_point" => Ok(LinkKind::PointToPoint),
            "csma" | "lan" | "shared-media" | "shared_media" => Ok(LinkKind::SharedMedia),
            "wifi" | "wlan" | "wireless-lan" | "wireless_lan" => Ok(LinkKind::WirelessLan),
            "wave" | "80211p" | "vehicular" => Ok(LinkKind::Vehicular),
            "lte" | "cellular" | "cellular-access" | "cellular_access" => {
                Ok(LinkKind::CellularAccess)
            }
            other => Err(FabricError::UnsupportedLinkKind(other.to_string())),
        }
    }
}

/// What a device does on its segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    Plain,
    AccessPoint,
    Station,
    BaseStation,
    MobileStation,
    /// Packet gateway endpoint of the cellular segment
    Tunnel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SegmentId(u32);

impl SegmentId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seg{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(u32);

impl DeviceId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// A node's endpoint on one segment
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub node: NodeId,
    pub segment: SegmentId,
    pub kind: LinkKind,
    pub role: DeviceRole,
}

/// A broadcast or point-to-point domain of one technology
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub id: SegmentId,
    pub kind: LinkKind,
    pub profile: LinkProfile,
    pub devices: Vec<DeviceId>,
    sealed: bool,
}

impl Segment {
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

/// Devices created by one install call, in node order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceGroup {
    segment: SegmentId,
    devices: Vec<DeviceId>,
}

impl DeviceGroup {
    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn get(&self, i: usize) -> Option<DeviceId> {
        self.devices.get(i).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.iter().copied()
    }

    pub fn as_slice(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Access point and station devices sharing one wireless LAN
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiDevices {
    pub access_points: DeviceGroup,
    pub stations: DeviceGroup,
}

/// Base station and mobile station devices of one radio access segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellularDevices {
    pub base_stations: DeviceGroup,
    pub mobiles: DeviceGroup,
}

impl CellularDevices {
    pub fn segment(&self) -> SegmentId {
        self.base_stations.segment()
    }
}

/// Every segment and device of a scenario
#[derive(Debug, Clone)]
pub struct LinkFabric {
    profiles: LinkProfiles,
    component_carriers: u8,
    segments: Vec<Segment>,
    devices: Vec<Device>,
    by_node: BTreeMap<NodeId, Vec<DeviceId>>,
}

impl LinkFabric {
    pub fn new(profiles: LinkProfiles) -> Self {
        Self {
            profiles,
            component_carriers: 1,
            segments: Vec::new(),
            devices: Vec::new(),
            by_node: BTreeMap::new(),
        }
    }

    /// Cellular segments created afterwards aggregate `carriers` component
    /// carriers, scaling the radio data rate
    pub fn with_component_carriers(mut self, carriers: u8) -> Self {
        self.component_carriers = carriers.max(1);
        self
    }

    pub fn component_carriers(&self) -> u8 {
        self.component_carriers
    }

    /// Configured parameters for a technology
    pub fn profile_for(&self, kind: LinkKind) -> LinkProfile {
        match kind {
            LinkKind::PointToPoint => self.profiles.point_to_point.clone(),
            LinkKind::SharedMedia => self.profiles.shared_media.clone(),
            LinkKind::WirelessLan => self.profiles.wireless_lan.clone(),
            LinkKind::Vehicular => self.profiles.vehicular.clone(),
            LinkKind::CellularAccess => self
                .profiles
                .cellular_access
                .clone()
                .with_rate_factor(self.component_carriers as u64),
        }
    }

    pub fn profiles(&self) -> &LinkProfiles {
        &self.profiles
    }

    /// Create one segment of `kind` with a plain device per node
    pub fn install(
        &mut self,
        kind: LinkKind,
        nodes: &NodeSet,
        registry: &NodeRegistry,
    ) -> Result<DeviceGroup, FabricError> {
        let members: Vec<(NodeId, DeviceRole)> =
            nodes.iter().map(|n| (n, DeviceRole::Plain)).collect();
        let profile = self.profile_for(kind);
        self.install_segment(kind, profile, &members, registry)
    }

    /// Same as `install`, with the technology given by its tag
    pub fn install_by_tag(
        &mut self,
        tag: &str,
        nodes: &NodeSet,
        registry: &NodeRegistry,
    ) -> Result<DeviceGroup, FabricError> {
        let kind: LinkKind = tag.parse()?;
        self.install(kind, nodes, registry)
    }

    /// Point-to-point segment with an explicit profile, used for backhaul
    pub fn install_point_to_point(
        &mut self,
        a: NodeId,
        b: NodeId,
        profile: LinkProfile,
        registry: &NodeRegistry,
    ) -> Result<DeviceGroup, FabricError> {
        let members = [(a, DeviceRole::Plain), (b, DeviceRole::Plain)];
        self.install_segment(LinkKind::PointToPoint, profile, &members, registry)
    }

    /// Infrastructure wireless LAN: access point devices first, then stations
    pub fn install_wireless_lan(
        &mut self,
        access_points: &NodeSet,
        stations: &NodeSet,
        registry: &NodeRegistry,
    ) -> Result<WifiDevices, FabricError> {
        let members: Vec<(NodeId, DeviceRole)> = access_points
            .iter()
            .map(|n| (n, DeviceRole::AccessPoint))
            .chain(stations.iter().map(|n| (n, DeviceRole::Station)))
            .collect();
        let profile = self.profile_for(LinkKind::WirelessLan);
        let group = self.install_segment(LinkKind::WirelessLan, profile, &members, registry)?;
        let (aps, stas) = group.devices.split_at(access_points.len());
        Ok(WifiDevices {
            access_points: DeviceGroup {
                segment: group.segment,
                devices: aps.to_vec(),
            },
            stations: DeviceGroup {
                segment: group.segment,
                devices: stas.to_vec(),
            },
        })
    }

    /// Radio access segment: base station devices first, then mobile stations
    pub fn install_cellular(
        &mut self,
        base_stations: &NodeSet,
        mobiles: &NodeSet,
        registry: &NodeRegistry,
    ) -> Result<CellularDevices, FabricError> {
        if base_stations.is_empty() {
            return Err(FabricError::EmptySegment(LinkKind::CellularAccess));
        }
        let members: Vec<(NodeId, DeviceRole)> = base_stations
            .iter()
            .map(|n| (n, DeviceRole::BaseStation))
            .chain(mobiles.iter().map(|n| (n, DeviceRole::MobileStation)))
            .collect();
        let profile = self.profile_for(LinkKind::CellularAccess);
        let group =
            self.install_segment(LinkKind::CellularAccess, profile, &members, registry)?;
        let (bs, ms) = group.devices.split_at(base_stations.len());
        Ok(CellularDevices {
            base_stations: DeviceGroup {
                segment: group.segment,
                devices: bs.to_vec(),
            },
            mobiles: DeviceGroup {
                segment: group.segment,
                devices: ms.to_vec(),
            },
        })
    }

    /// Add devices with `role` to an existing segment. Only allowed before
    /// the segment is addressed. Tunnel endpoints belong to the packet core
    /// and cannot be added this way.
    pub fn install_into(
        &mut self,
        segment: SegmentId,
        nodes: &NodeSet,
        role: DeviceRole,
        registry: &NodeRegistry,
    ) -> Result<DeviceGroup, FabricError> {
        if role == DeviceRole::Tunnel {
            let kind = self.segment(segment)?.kind;
            return Err(FabricError::RoleMismatch { kind, role });
        }
        self.join(segment, nodes, role, registry)
    }

    fn join(
        &mut self,
        segment: SegmentId,
        nodes: &NodeSet,
        role: DeviceRole,
        registry: &NodeRegistry,
    ) -> Result<DeviceGroup, FabricError> {
        let seg = self.segment(segment)?;
        let kind = seg.kind;
        if seg.sealed {
            return Err(FabricError::SegmentSealed(segment));
        }
        if kind == LinkKind::PointToPoint {
            return Err(FabricError::PointToPointArity(seg.devices.len() + nodes.len()));
        }
        if !kind.accepts(role) {
            return Err(FabricError::RoleMismatch { kind, role });
        }
        self.check_members(segment, nodes.iter(), registry)?;

        let devices = nodes
            .iter()
            .map(|node| self.push_device(node, segment, kind, role))
            .collect();
        Ok(DeviceGroup { segment, devices })
    }

    fn install_segment(
        &mut self,
        kind: LinkKind,
        profile: LinkProfile,
        members: &[(NodeId, DeviceRole)],
        registry: &NodeRegistry,
    ) -> Result<DeviceGroup, FabricError> {
        if members.is_empty() {
            return Err(FabricError::EmptySegment(kind));
        }
        if kind == LinkKind::PointToPoint && members.len() != 2 {
            return Err(FabricError::PointToPointArity(members.len()));
        }
        if let Some((_, role)) = members.iter().find(|(_, role)| !kind.accepts(*role)) {
            return Err(FabricError::RoleMismatch { kind, role: *role });
        }

        let id = SegmentId(self.segments.len() as u32);
        self.check_members(id, members.iter().map(|(n, _)| *n), registry)?;

        self.segments.push(Segment {
            id,
            kind,
            profile,
            devices: Vec::with_capacity(members.len()),
            sealed: false,
        });
        let devices = members
            .iter()
            .map(|(node, role)| self.push_device(*node, id, kind, *role))
            .collect();

        info!("Created {} segment {} with {} devices", kind, id, members.len());
        Ok(DeviceGroup {
            segment: id,
            devices,
        })
    }

    fn check_members(
        &self,
        segment: SegmentId,
        nodes: impl Iterator<Item = NodeId>,
        registry: &NodeRegistry,
    ) -> Result<(), FabricError> {
        let mut seen: Vec<NodeId> = Vec::new();
        for node in nodes {
            registry.check(node)?;
            if seen.contains(&node) || self.device_on(node, segment).is_some() {
                return Err(FabricError::DuplicateMember { node, segment });
            }
            seen.push(node);
        }
        Ok(())
    }

    fn push_device(
        &mut self,
        node: NodeId,
        segment: SegmentId,
        kind: LinkKind,
        role: DeviceRole,
    ) -> DeviceId {
        let id = DeviceId(self.devices.len() as u32);
        self.devices.push(Device {
            id,
            node,
            segment,
            kind,
            role,
        });
        self.segments[segment.index()].devices.push(id);
        self.by_node.entry(node).or_default().push(id);
        debug!("Device {} ({:?}) on {} for node {}", id, role, segment, node);
        id
    }

    /// Gateway-side endpoint of a cellular segment
    pub(crate) fn add_tunnel(
        &mut self,
        segment: SegmentId,
        gateway: NodeId,
        registry: &NodeRegistry,
    ) -> Result<DeviceId, FabricError> {
        let group = self.join(
            segment,
            &NodeSet::single(gateway),
            DeviceRole::Tunnel,
            registry,
        )?;
        group.get(0).ok_or(FabricError::UnknownSegment(segment))
    }

    /// Freeze a segment's membership once it has an address block
    pub(crate) fn seal(&mut self, segment: SegmentId) -> Result<(), FabricError> {
        let seg = self
            .segments
            .get_mut(segment.index())
            .ok_or(FabricError::UnknownSegment(segment))?;
        seg.sealed = true;
        Ok(())
    }

    pub fn segment(&self, id: SegmentId) -> Result<&Segment, FabricError> {
        self.segments
            .get(id.index())
            .ok_or(FabricError::UnknownSegment(id))
    }

    pub fn device(&self, id: DeviceId) -> Result<&Device, FabricError> {
        self.devices
            .get(id.index())
            .ok_or(FabricError::UnknownDevice(id))
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Devices held by `node`, in creation order
    pub fn devices_of(&self, node: NodeId) -> &[DeviceId] {
        self.by_node.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn device_on(&self, node: NodeId, segment: SegmentId) -> Option<DeviceId> {
        self.devices_of(node)
            .iter()
            .copied()
            .find(|d| self.devices[d.index()].segment == segment)
    }
}
