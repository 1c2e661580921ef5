//! Cellular attachment, packet core and data bearers
//!
//! Each mobile device walks `Unattached -> Attached -> BearerActive`.
//! Attachment hands out an `Attached` token, which is the only way to
//! request a mobile address, so addressing cannot precede attachment.
//! Bearer activation over a device set is all-or-nothing.

use crate::addr::{backhaul_subnet, AddrError, AddressAssembler};
use crate::link::{DeviceId, DeviceRole, FabricError, LinkFabric, LinkKind, SegmentId};
use crate::node::{NodeError, NodeId, NodeRegistry, NodeRole, NodeSet};
use ipnetwork::Ipv4Network;
use scenarios::QosClass;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::{debug, info};

/// Mobile address pool
pub const MOBILE_POOL: Ipv4Addr = Ipv4Addr::new(7, 0, 0, 0);
pub const MOBILE_POOL_LEN: u8 = 8;
/// Gateway side of the mobile pool, the mobiles' default gateway
pub const DEFAULT_GATEWAY: Ipv4Addr = Ipv4Addr::new(7, 0, 0, 1);

/// EPS bearer identities 5..=15
pub const FIRST_BEARER_ID: u8 = 5;
pub const MAX_BEARERS: usize = 11;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CellularError {
    #[error("Device {0} is not a mobile station device")]
    NotMobileDevice(DeviceId),

    #[error("Base station device {0} was never installed")]
    UnknownBaseStation(DeviceId),

    #[error("Device {0} is not a base station device")]
    NotBaseStation(DeviceId),

    #[error("Mobile {mobile} and base station {base_station} are on different segments")]
    SegmentMismatch {
        mobile: DeviceId,
        base_station: DeviceId,
    },

    #[error("Mobile {mobile} is attached to {serving}, cannot attach to {requested}")]
    AlreadyAttached {
        mobile: DeviceId,
        serving: DeviceId,
        requested: DeviceId,
    },

    #[error("Base station {0} has no backhaul to the packet core")]
    NoBackhaul(DeviceId),

    #[error("Mobile {0} must be attached before it is addressed")]
    AddressBeforeAttach(DeviceId),

    #[error("Mobile address pool exhausted")]
    PoolExhausted,

    #[error("Cannot activate a bearer on unattached mobile {0}")]
    Unattached(DeviceId),

    #[error("Mobile {device} would exceed {limit} bearers")]
    BearerLimit { device: DeviceId, limit: usize },

    #[error("Bearer activation needs at least one device")]
    EmptyBearerSet,

    #[error("No packet core has been created")]
    NoPacketCore,

    #[error("A packet core already exists")]
    PacketCoreExists,

    #[error("Segment {0} is not a cellular access segment")]
    NotCellular(SegmentId),

    #[error(transparent)]
    Addr(#[from] AddrError),

    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl CellularError {
    /// Whether the error came out of bearer activation
    pub fn is_bearer_failure(&self) -> bool {
        matches!(
            self,
            CellularError::Unattached(_)
                | CellularError::BearerLimit { .. }
                | CellularError::EmptyBearerSet
                | CellularError::NoPacketCore
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AttachState {
    Unattached,
    Attached { base_station: DeviceId },
    BearerActive { base_station: DeviceId },
}

impl AttachState {
    pub fn serving(&self) -> Option<DeviceId> {
        match self {
            AttachState::Unattached => None,
            AttachState::Attached { base_station } | AttachState::BearerActive { base_station } => {
                Some(*base_station)
            }
        }
    }
}

/// Proof that a mobile device is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attached {
    mobile: DeviceId,
    base_station: DeviceId,
}

impl Attached {
    pub fn mobile(&self) -> DeviceId {
        self.mobile
    }

    pub fn base_station(&self) -> DeviceId {
        self.base_station
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    Uplink,
    Downlink,
    Bidirectional,
}

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub const ALL: PortRange = PortRange {
        start: 0,
        end: u16::MAX,
    };

    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    pub fn contains(&self, port: u16) -> bool {
        self.start <= port && port <= self.end
    }
}

/// One packet filter of a traffic-flow template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PacketFilter {
    pub direction: FlowDirection,
    /// Remote prefix, `None` matches any address
    pub remote: Option<Ipv4Network>,
    pub remote_ports: PortRange,
    pub local_ports: PortRange,
}

impl Default for PacketFilter {
    fn default() -> Self {
        Self {
            direction: FlowDirection::Bidirectional,
            remote: None,
            remote_ports: PortRange::ALL,
            local_ports: PortRange::ALL,
        }
    }
}

impl PacketFilter {
    fn matches(
        &self,
        direction: FlowDirection,
        remote: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
    ) -> bool {
        let direction_ok =
            self.direction == FlowDirection::Bidirectional || self.direction == direction;
        direction_ok
            && self.remote.map_or(true, |net| net.contains(remote))
            && self.remote_ports.contains(remote_port)
            && self.local_ports.contains(local_port)
    }
}

/// Packet classifier attached to a bearer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrafficTemplate {
    pub filters: Vec<PacketFilter>,
}

impl TrafficTemplate {
    /// Template matching every packet in both directions
    pub fn match_all() -> Self {
        Self {
            filters: vec![PacketFilter::default()],
        }
    }

    pub fn with_filter(mut self, filter: PacketFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// `direction` is the packet's direction as seen from the mobile
    pub fn matches(
        &self,
        direction: FlowDirection,
        remote: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
    ) -> bool {
        self.filters
            .iter()
            .any(|f| f.matches(direction, remote, remote_port, local_port))
    }
}

impl Default for TrafficTemplate {
    fn default() -> Self {
        Self::match_all()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bearer {
    pub eps_id: u8,
    pub mobile: DeviceId,
    pub base_station: DeviceId,
    pub qos: QosClass,
    pub template: TrafficTemplate,
}

/// Base station to gateway point-to-point link
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Backhaul {
    pub segment: SegmentId,
    pub base_station_device: DeviceId,
    pub gateway_device: DeviceId,
    pub base_station_address: Ipv4Addr,
    pub gateway_address: Ipv4Addr,
}

#[derive(Debug, Clone)]
pub struct PacketCore {
    gateway: NodeId,
    tunnel: DeviceId,
    segment: SegmentId,
    pool: Ipv4Network,
    next_host: u32,
    backhaul: BTreeMap<DeviceId, Backhaul>,
}

impl PacketCore {
    pub fn gateway(&self) -> NodeId {
        self.gateway
    }

    /// Gateway endpoint on the cellular segment
    pub fn tunnel(&self) -> DeviceId {
        self.tunnel
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn pool(&self) -> Ipv4Network {
        self.pool
    }

    pub fn default_gateway_address(&self) -> Ipv4Addr {
        DEFAULT_GATEWAY
    }

    pub fn backhaul(&self, base_station: DeviceId) -> Option<&Backhaul> {
        self.backhaul.get(&base_station)
    }
}

/// Attachment state, bearers and packet core of a scenario
#[derive(Debug, Clone, Default)]
pub struct CellularManager {
    core: Option<PacketCore>,
    states: BTreeMap<DeviceId, AttachState>,
    bearers: Vec<Bearer>,
}

impl CellularManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the packet gateway for a radio access segment.
    ///
    /// The gateway node gets an IP stack, a tunnel device on the segment
    /// holding the first address of the mobile pool, and one backhaul link
    /// per base station already on the segment.
    pub fn create_packet_core(
        &mut self,
        registry: &mut NodeRegistry,
        fabric: &mut LinkFabric,
        addrs: &mut AddressAssembler,
        cell: SegmentId,
    ) -> Result<NodeId, CellularError> {
        if self.core.is_some() {
            return Err(CellularError::PacketCoreExists);
        }
        let segment = fabric.segment(cell)?;
        if segment.kind != LinkKind::CellularAccess {
            return Err(CellularError::NotCellular(cell));
        }
        if segment.is_sealed() {
            return Err(FabricError::SegmentSealed(cell).into());
        }
        let base_stations: Vec<(DeviceId, NodeId)> = segment
            .devices
            .iter()
            .filter_map(|d| fabric.device(*d).ok())
            .filter(|d| d.role == DeviceRole::BaseStation)
            .map(|d| (d.id, d.node))
            .collect();

        // Nothing is created until every prefix is known to be free
        let pool = Ipv4Network::new(MOBILE_POOL, MOBILE_POOL_LEN)
            .map_err(|e| AddrError::InvalidConfig(e.to_string()))?;
        addrs.check_claim(cell, pool)?;
        let subnets = (0..base_stations.len())
            .map(|i| {
                let index = u16::try_from(i)
                    .map_err(|_| AddrError::InvalidConfig(format!("Backhaul index {} too high", i)))?;
                let (subnet, _, _) = backhaul_subnet(index)?;
                addrs.check_free(subnet)?;
                Ok(subnet)
            })
            .collect::<Result<Vec<_>, AddrError>>()?;

        addrs.claim_block(cell, pool)?;
        let gateway = registry.create_one(NodeRole::Gateway);
        registry.install_stack(&NodeSet::single(gateway))?;
        let tunnel = fabric.add_tunnel(cell, gateway, registry)?;
        addrs.bind(tunnel, DEFAULT_GATEWAY, MOBILE_POOL_LEN)?;

        let profile = fabric.profiles().core_backhaul.clone();
        let mut backhaul = BTreeMap::new();
        for ((bs_device, bs_node), subnet) in base_stations.iter().zip(subnets) {
            registry.install_stack(&NodeSet::single(*bs_node))?;
            let link = fabric.install_point_to_point(*bs_node, gateway, profile.clone(), registry)?;
            let assigned = addrs.assign_addresses(fabric, registry, link.segment(), subnet)?;
            let (Some(bs_dev), Some(gw_dev)) = (link.get(0), link.get(1)) else {
                return Err(FabricError::PointToPointArity(link.len()).into());
            };
            backhaul.insert(
                *bs_device,
                Backhaul {
                    segment: link.segment(),
                    base_station_device: bs_dev,
                    gateway_device: gw_dev,
                    base_station_address: assigned[0],
                    gateway_address: assigned[1],
                },
            );
        }

        info!(
            "Packet core on {} serving {} base stations, pool {}",
            gateway,
            backhaul.len(),
            pool
        );
        self.core = Some(PacketCore {
            gateway,
            tunnel,
            segment: cell,
            pool,
            // .1 is the gateway
            next_host: 2,
            backhaul,
        });
        Ok(gateway)
    }

    pub fn packet_core(&self) -> Option<&PacketCore> {
        self.core.as_ref()
    }

    /// Bind a mobile device to a serving base station
    pub fn attach(
        &mut self,
        fabric: &LinkFabric,
        mobile: DeviceId,
        base_station: DeviceId,
    ) -> Result<Attached, CellularError> {
        let ms = fabric
            .device(mobile)
            .map_err(|_| CellularError::NotMobileDevice(mobile))?;
        if ms.role != DeviceRole::MobileStation {
            return Err(CellularError::NotMobileDevice(mobile));
        }
        let bs = fabric
            .device(base_station)
            .map_err(|_| CellularError::UnknownBaseStation(base_station))?;
        if bs.role != DeviceRole::BaseStation {
            return Err(CellularError::NotBaseStation(base_station));
        }
        if ms.segment != bs.segment {
            return Err(CellularError::SegmentMismatch {
                mobile,
                base_station,
            });
        }
        if let Some(core) = &self.core {
            if core.backhaul(base_station).is_none() {
                return Err(CellularError::NoBackhaul(base_station));
            }
        }

        match self.state(mobile).serving() {
            Some(serving) if serving != base_station => {
                return Err(CellularError::AlreadyAttached {
                    mobile,
                    serving,
                    requested: base_station,
                })
            }
            Some(_) => {}
            None => {
                self.states
                    .insert(mobile, AttachState::Attached { base_station });
                info!("Mobile {} attached to {}", mobile, base_station);
            }
        }
        Ok(Attached {
            mobile,
            base_station,
        })
    }

    /// Give an attached mobile its address from the pool. Re-requesting
    /// returns the address already bound.
    pub fn assign_mobile_address(
        &mut self,
        addrs: &mut AddressAssembler,
        attached: &Attached,
    ) -> Result<Ipv4Addr, CellularError> {
        if self.state(attached.mobile).serving() != Some(attached.base_station) {
            return Err(CellularError::AddressBeforeAttach(attached.mobile));
        }
        let core = self.core.as_mut().ok_or(CellularError::NoPacketCore)?;
        if let Some(existing) = addrs.address_of(attached.mobile) {
            return Ok(existing);
        }
        let offset = core.next_host;
        let capacity = (1u64 << (32 - core.pool.prefix() as u32)) - 2;
        if offset as u64 > capacity {
            return Err(CellularError::PoolExhausted);
        }
        let ip = Ipv4Addr::from(u32::from(core.pool.network()) + offset);
        addrs.bind(attached.mobile, ip, core.pool.prefix())?;
        core.next_host += 1;
        debug!("Mobile {} addressed {}", attached.mobile, ip);
        Ok(ip)
    }

    /// Activate a bearer with `qos` on every device of the set, or on none
    pub fn activate_bearer(
        &mut self,
        mobiles: &[DeviceId],
        qos: QosClass,
        template: TrafficTemplate,
    ) -> Result<Vec<Bearer>, CellularError> {
        if mobiles.is_empty() {
            return Err(CellularError::EmptyBearerSet);
        }
        if self.core.is_none() {
            return Err(CellularError::NoPacketCore);
        }

        let mut planned: BTreeMap<DeviceId, usize> = BTreeMap::new();
        for mobile in mobiles {
            if self.state(*mobile).serving().is_none() {
                return Err(CellularError::Unattached(*mobile));
            }
            let count = planned
                .entry(*mobile)
                .or_insert_with(|| self.bearers_of(*mobile).count());
            *count += 1;
            if *count > MAX_BEARERS {
                return Err(CellularError::BearerLimit {
                    device: *mobile,
                    limit: MAX_BEARERS,
                });
            }
        }

        let mut activated = Vec::with_capacity(mobiles.len());
        for mobile in mobiles {
            let Some(base_station) = self.state(*mobile).serving() else {
                continue;
            };
            let eps_id = FIRST_BEARER_ID + self.bearers_of(*mobile).count() as u8;
            let bearer = Bearer {
                eps_id,
                mobile: *mobile,
                base_station,
                qos,
                template: template.clone(),
            };
            self.bearers.push(bearer.clone());
            self.states
                .insert(*mobile, AttachState::BearerActive { base_station });
            info!(
                "Bearer {} ({}) active on {} via {}",
                eps_id, qos, mobile, base_station
            );
            activated.push(bearer);
        }
        Ok(activated)
    }

    pub fn state(&self, mobile: DeviceId) -> AttachState {
        self.states
            .get(&mobile)
            .copied()
            .unwrap_or(AttachState::Unattached)
    }

    pub fn states(&self) -> &BTreeMap<DeviceId, AttachState> {
        &self.states
    }

    pub fn bearers(&self) -> &[Bearer] {
        &self.bearers
    }

    pub fn bearers_of(&self, mobile: DeviceId) -> impl Iterator<Item = &Bearer> + '_ {
        self.bearers.iter().filter(move |b| b.mobile == mobile)
    }

    /// Bearer carrying a packet: among matching bearers the one with the
    /// best scheduling priority, then the lowest bearer id
    pub fn classify(
        &self,
        mobile: DeviceId,
        direction: FlowDirection,
        remote: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
    ) -> Option<&Bearer> {
        if !matches!(self.state(mobile), AttachState::BearerActive { .. }) {
            return None;
        }
        self.bearers_of(mobile)
            .filter(|b| b.template.matches(direction, remote, remote_port, local_port))
            .min_by_key(|b| (b.qos.priority(), b.eps_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::CellularDevices;
    use scenarios::LinkProfiles;

    struct Cell {
        registry: NodeRegistry,
        fabric: LinkFabric,
        addrs: AddressAssembler,
        devices: CellularDevices,
        cellular: CellularManager,
    }

    fn cell(base_stations: usize, mobiles: usize) -> Cell {
        let mut registry = NodeRegistry::new();
        let bs = registry.create(NodeRole::BaseStation, base_stations);
        let ms = registry.create(NodeRole::MobileStation, mobiles);
        registry.install_stack(&ms).unwrap();
        let mut fabric = LinkFabric::new(LinkProfiles::default());
        let devices = fabric.install_cellular(&bs, &ms, &registry).unwrap();
        let mut addrs = AddressAssembler::new();
        let mut cellular = CellularManager::new();
        cellular
            .create_packet_core(&mut registry, &mut fabric, &mut addrs, devices.segment())
            .unwrap();
        Cell {
            registry,
            fabric,
            addrs,
            devices,
            cellular,
        }
    }

    #[test]
    fn test_packet_core_layout() {
        let c = cell(2, 1);
        let core = c.cellular.packet_core().unwrap();
        assert_eq!(c.registry.role(core.gateway()), Some(NodeRole::Gateway));
        assert!(c.registry.has_stack(core.gateway()));
        assert_eq!(c.addrs.address_of(core.tunnel()), Some(DEFAULT_GATEWAY));

        let second = core.backhaul(c.devices.base_stations.get(1).unwrap()).unwrap();
        assert_eq!(second.base_station_address, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(second.gateway_address, Ipv4Addr::new(10, 0, 0, 6));
    }

    #[test]
    fn test_attach_then_address() {
        let mut c = cell(1, 2);
        let bs = c.devices.base_stations.get(0).unwrap();
        let first = c
            .cellular
            .attach(&c.fabric, c.devices.mobiles.get(0).unwrap(), bs)
            .unwrap();
        let second = c
            .cellular
            .attach(&c.fabric, c.devices.mobiles.get(1).unwrap(), bs)
            .unwrap();
        let a = c.cellular.assign_mobile_address(&mut c.addrs, &first).unwrap();
        let b = c.cellular.assign_mobile_address(&mut c.addrs, &second).unwrap();
        assert_eq!(a, Ipv4Addr::new(7, 0, 0, 2));
        assert_eq!(b, Ipv4Addr::new(7, 0, 0, 3));
        // Idempotent
        assert_eq!(
            c.cellular.assign_mobile_address(&mut c.addrs, &first).unwrap(),
            a
        );
    }

    #[test]
    fn test_single_attachment_policy() {
        let mut c = cell(2, 1);
        let ms = c.devices.mobiles.get(0).unwrap();
        let bs0 = c.devices.base_stations.get(0).unwrap();
        let bs1 = c.devices.base_stations.get(1).unwrap();
        c.cellular.attach(&c.fabric, ms, bs0).unwrap();
        assert!(c.cellular.attach(&c.fabric, ms, bs0).is_ok());
        let err = c.cellular.attach(&c.fabric, ms, bs1).unwrap_err();
        assert!(matches!(err, CellularError::AlreadyAttached { .. }));
        assert_eq!(
            c.cellular.state(ms),
            AttachState::Attached { base_station: bs0 }
        );
    }

    #[test]
    fn test_attach_needs_backhaul_of_the_core() {
        let mut c = cell(1, 1);
        let bs = c.registry.create(NodeRole::BaseStation, 1);
        let ms = c.registry.create(NodeRole::MobileStation, 1);
        let other = c.fabric.install_cellular(&bs, &ms, &c.registry).unwrap();
        let bs_dev = other.base_stations.get(0).unwrap();

        let err = c
            .cellular
            .attach(&c.fabric, other.mobiles.get(0).unwrap(), bs_dev)
            .unwrap_err();
        assert_eq!(err, CellularError::NoBackhaul(bs_dev));
        assert!(c.cellular.states().is_empty());
    }

    #[test]
    fn test_failed_packet_core_leaves_nothing_behind() {
        let mut registry = NodeRegistry::new();
        let bs = registry.create(NodeRole::BaseStation, 2);
        let ms = registry.create(NodeRole::MobileStation, 1);
        let mut fabric = LinkFabric::new(LinkProfiles::default());
        let devices = fabric.install_cellular(&bs, &ms, &registry).unwrap();
        let mut addrs = AddressAssembler::new();
        addrs.reserve("10.0.0.4/30".parse().unwrap(), "operator").unwrap();
        let mut cellular = CellularManager::new();

        let err = cellular
            .create_packet_core(&mut registry, &mut fabric, &mut addrs, devices.segment())
            .unwrap_err();
        assert!(matches!(err, CellularError::Addr(AddrError::Overlap { .. })));
        assert!(cellular.packet_core().is_none());
        assert_eq!(registry.len(), 3);
        assert!(!registry.has_stack(bs.get(0).unwrap()));
        assert_eq!(fabric.segments().len(), 1);
        assert_eq!(fabric.devices().len(), 3);
        assert!(addrs.block_of(devices.segment()).is_none());

        // A pool clash is caught the same way
        let mut addrs = AddressAssembler::new();
        addrs.reserve("7.7.0.0/16".parse().unwrap(), "operator").unwrap();
        let err = cellular
            .create_packet_core(&mut registry, &mut fabric, &mut addrs, devices.segment())
            .unwrap_err();
        assert!(matches!(err, CellularError::Addr(AddrError::Overlap { .. })));
        assert_eq!(registry.len(), 3);
        assert_eq!(fabric.devices().len(), 3);
    }

    #[test]
    fn test_attach_to_uninstalled_base_station() {
        let mut c = cell(1, 1);
        let ms = c.devices.mobiles.get(0).unwrap();
        let bogus = c.fabric.devices().last().unwrap().id;
        // Last device is a backhaul endpoint, not a base station
        assert_eq!(
            c.cellular.attach(&c.fabric, ms, bogus),
            Err(CellularError::NotBaseStation(bogus))
        );
        let mut other = LinkFabric::new(LinkProfiles::default());
        let mut other_registry = NodeRegistry::new();
        let many = other_registry.create(NodeRole::Peer, 32);
        other
            .install(LinkKind::SharedMedia, &many, &other_registry)
            .unwrap();
        let never = other.devices().last().unwrap().id;
        assert_eq!(
            c.cellular.attach(&c.fabric, ms, never),
            Err(CellularError::UnknownBaseStation(never))
        );
    }

    #[test]
    fn test_bearer_activation_is_atomic() {
        let mut c = cell(1, 2);
        let bs = c.devices.base_stations.get(0).unwrap();
        let ms0 = c.devices.mobiles.get(0).unwrap();
        let ms1 = c.devices.mobiles.get(1).unwrap();
        c.cellular.attach(&c.fabric, ms0, bs).unwrap();

        let err = c
            .cellular
            .activate_bearer(c.devices.mobiles.as_slice(), QosClass::default(), TrafficTemplate::match_all())
            .unwrap_err();
        assert_eq!(err, CellularError::Unattached(ms1));
        assert!(err.is_bearer_failure());
        assert_eq!(c.cellular.state(ms0), AttachState::Attached { base_station: bs });
        assert_eq!(c.cellular.state(ms1), AttachState::Unattached);
        assert!(c.cellular.bearers().is_empty());

        c.cellular.attach(&c.fabric, ms1, bs).unwrap();
        let bearers = c
            .cellular
            .activate_bearer(c.devices.mobiles.as_slice(), QosClass::default(), TrafficTemplate::match_all())
            .unwrap();
        assert_eq!(bearers.len(), 2);
        assert!(bearers.iter().all(|b| b.eps_id == FIRST_BEARER_ID));
        assert_eq!(
            c.cellular.state(ms1),
            AttachState::BearerActive { base_station: bs }
        );
    }

    #[test]
    fn test_bearer_limit() {
        let mut c = cell(1, 1);
        let bs = c.devices.base_stations.get(0).unwrap();
        let ms = c.devices.mobiles.get(0).unwrap();
        c.cellular.attach(&c.fabric, ms, bs).unwrap();
        for _ in 0..MAX_BEARERS {
            c.cellular
                .activate_bearer(&[ms], QosClass::NgbrIms, TrafficTemplate::default())
                .unwrap();
        }
        assert_eq!(c.cellular.bearers_of(ms).last().unwrap().eps_id, 15);
        let err = c
            .cellular
            .activate_bearer(&[ms], QosClass::NgbrIms, TrafficTemplate::default())
            .unwrap_err();
        assert_eq!(
            err,
            CellularError::BearerLimit {
                device: ms,
                limit: MAX_BEARERS
            }
        );
    }

    #[test]
    fn test_classification_prefers_priority() {
        let mut c = cell(1, 1);
        let bs = c.devices.base_stations.get(0).unwrap();
        let ms = c.devices.mobiles.get(0).unwrap();
        c.cellular.attach(&c.fabric, ms, bs).unwrap();
        assert!(c
            .cellular
            .classify(ms, FlowDirection::Uplink, Ipv4Addr::new(1, 0, 0, 2), 2001, 49153)
            .is_none());

        c.cellular
            .activate_bearer(&[ms], QosClass::NgbrVideoTcpDefault, TrafficTemplate::match_all())
            .unwrap();
        let voice = TrafficTemplate {
            filters: vec![PacketFilter {
                direction: FlowDirection::Uplink,
                remote_ports: PortRange::single(5060),
                ..PacketFilter::default()
            }],
        };
        c.cellular
            .activate_bearer(&[ms], QosClass::GbrConvVoice, voice)
            .unwrap();

        let sip = c
            .cellular
            .classify(ms, FlowDirection::Uplink, Ipv4Addr::new(1, 0, 0, 2), 5060, 1)
            .unwrap();
        assert_eq!(sip.qos, QosClass::GbrConvVoice);
        let other = c
            .cellular
            .classify(ms, FlowDirection::Downlink, Ipv4Addr::new(1, 0, 0, 2), 5060, 1)
            .unwrap();
        assert_eq!(other.qos, QosClass::NgbrVideoTcpDefault);
    }
}
