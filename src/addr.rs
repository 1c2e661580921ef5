//! IPv4 address assignment
//!
//! Each link segment receives one disjoint prefix and every device on it one
//! address from that prefix, handed out from the first host address in
//! device order. Prefixes reserved by the packet core (mobile pool,
//! backhaul) go through the same overlap check.

use crate::link::{DeviceId, FabricError, LinkFabric, LinkKind, SegmentId};
use crate::node::{NodeError, NodeId, NodeRegistry};
use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddrError {
    #[error("Prefix {prefix} overlaps {existing} already assigned to {owner}")]
    Overlap {
        prefix: Ipv4Network,
        existing: Ipv4Network,
        owner: String,
    },

    #[error("Segment {segment} is already addressed with {existing}")]
    AlreadyAddressed {
        segment: SegmentId,
        existing: Ipv4Network,
    },

    #[error("Prefix {prefix} has room for {capacity} hosts, segment needs {needed}")]
    PrefixExhausted {
        prefix: Ipv4Network,
        capacity: u64,
        needed: usize,
    },

    #[error("Cellular segment {0} is addressed through the packet core")]
    CellularSegment(SegmentId),

    #[error("Device {0} has no address")]
    Unaddressed(DeviceId),

    #[error("Route via {next_hop} is not reachable from {egress} ({network})")]
    NextHopOffLink {
        next_hop: Ipv4Addr,
        egress: DeviceId,
        network: Ipv4Network,
    },

    #[error("Device {device} does not belong to node {node}")]
    ForeignDevice { device: DeviceId, node: NodeId },

    #[error("Invalid network configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Fabric(#[from] FabricError),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Prefix owned by one segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressBlock {
    pub segment: SegmentId,
    pub prefix: Ipv4Network,
}

/// Device addresses and segment prefixes of a scenario
#[derive(Debug, Clone, Default)]
pub struct AddressAssembler {
    blocks: Vec<AddressBlock>,
    reserved: Vec<(Ipv4Network, String)>,
    interfaces: BTreeMap<DeviceId, Ipv4Network>,
    by_address: BTreeMap<Ipv4Addr, DeviceId>,
}

/// Strip host bits so `11.1.1.7/24` and `11.1.1.0/24` are the same block
pub fn normalize(prefix: Ipv4Network) -> Ipv4Network {
    Ipv4Network::new(prefix.network(), prefix.prefix()).unwrap_or(prefix)
}

/// Whether two prefixes share any address
pub fn overlaps(a: Ipv4Network, b: Ipv4Network) -> bool {
    a.contains(b.network()) || b.contains(a.network())
}

/// Number of assignable host addresses in a prefix
pub fn host_capacity(prefix: Ipv4Network) -> u64 {
    match prefix.prefix() {
        32 => 1,
        31 => 2,
        len => (1u64 << (32 - len as u32)) - 2,
    }
}

/// The `n`th host address (1-based) of a prefix
fn host_address(prefix: Ipv4Network, n: u64) -> Option<Ipv4Addr> {
    if n == 0 || n > host_capacity(prefix) {
        return None;
    }
    let offset = if prefix.prefix() >= 31 { n - 1 } else { n };
    let base = u32::from(prefix.network()) as u64;
    u32::try_from(base + offset).ok().map(Ipv4Addr::from)
}

impl AddressAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind one address per device of `segment`, in device order.
    ///
    /// The prefix must not overlap any prefix already handed out or
    /// reserved; a segment can be addressed once. Every member node must
    /// carry an IP stack. Returns the addresses in device order.
    pub fn assign_addresses(
        &mut self,
        fabric: &mut LinkFabric,
        registry: &NodeRegistry,
        segment: SegmentId,
        prefix: Ipv4Network,
    ) -> Result<Vec<Ipv4Addr>, AddrError> {
        let prefix = normalize(prefix);
        let seg = fabric.segment(segment)?;
        if seg.kind == LinkKind::CellularAccess {
            return Err(AddrError::CellularSegment(segment));
        }
        if let Some(existing) = self.block_of(segment) {
            return Err(AddrError::AlreadyAddressed {
                segment,
                existing: existing.prefix,
            });
        }
        self.check_overlap(prefix)?;

        let devices = seg.devices.clone();
        for dev in &devices {
            registry.require_stack(fabric.device(*dev)?.node)?;
        }
        let capacity = host_capacity(prefix);
        if devices.len() as u64 > capacity {
            return Err(AddrError::PrefixExhausted {
                prefix,
                capacity,
                needed: devices.len(),
            });
        }

        let mut addresses = Vec::with_capacity(devices.len());
        for (i, dev) in devices.iter().enumerate() {
            let ip = host_address(prefix, i as u64 + 1).ok_or(AddrError::PrefixExhausted {
                prefix,
                capacity,
                needed: devices.len(),
            })?;
            self.bind(*dev, ip, prefix.prefix())?;
            addresses.push(ip);
        }
        self.blocks.push(AddressBlock { segment, prefix });
        fabric.seal(segment)?;

        info!(
            "Assigned {} to {} ({} devices)",
            prefix,
            segment,
            addresses.len()
        );
        Ok(addresses)
    }

    /// Claim a prefix outside of any segment, e.g. an address pool
    pub fn reserve(&mut self, prefix: Ipv4Network, owner: &str) -> Result<(), AddrError> {
        let prefix = normalize(prefix);
        self.check_overlap(prefix)?;
        debug!("Reserved {} for {}", prefix, owner);
        self.reserved.push((prefix, owner.to_string()));
        Ok(())
    }

    /// Register the block of a segment whose devices are addressed one at a
    /// time (the cellular segment)
    pub(crate) fn claim_block(
        &mut self,
        segment: SegmentId,
        prefix: Ipv4Network,
    ) -> Result<(), AddrError> {
        self.check_claim(segment, prefix)?;
        self.blocks.push(AddressBlock {
            segment,
            prefix: normalize(prefix),
        });
        Ok(())
    }

    /// Whether `claim_block` would succeed, without claiming
    pub(crate) fn check_claim(&self, segment: SegmentId, prefix: Ipv4Network) -> Result<(), AddrError> {
        if let Some(existing) = self.block_of(segment) {
            return Err(AddrError::AlreadyAddressed {
                segment,
                existing: existing.prefix,
            });
        }
        self.check_free(prefix)
    }

    /// Whether `prefix` overlaps nothing assigned or reserved
    pub(crate) fn check_free(&self, prefix: Ipv4Network) -> Result<(), AddrError> {
        self.check_overlap(normalize(prefix))
    }

    /// Bind a single address to a device
    pub(crate) fn bind(
        &mut self,
        device: DeviceId,
        ip: Ipv4Addr,
        prefix_len: u8,
    ) -> Result<Ipv4Network, AddrError> {
        let iface =
            Ipv4Network::new(ip, prefix_len).map_err(|e| AddrError::InvalidConfig(e.to_string()))?;
        if let Some(owner) = self.by_address.get(&ip) {
            return Err(AddrError::InvalidConfig(format!(
                "address {} already bound to {}",
                ip, owner
            )));
        }
        self.interfaces.insert(device, iface);
        self.by_address.insert(ip, device);
        debug!("Bound {} to {}", iface, device);
        Ok(iface)
    }

    fn check_overlap(&self, prefix: Ipv4Network) -> Result<(), AddrError> {
        let assigned = self
            .blocks
            .iter()
            .map(|b| (b.prefix, b.segment.to_string()));
        let reserved = self.reserved.iter().map(|(p, o)| (*p, o.clone()));
        for (existing, owner) in assigned.chain(reserved) {
            if overlaps(prefix, existing) {
                return Err(AddrError::Overlap {
                    prefix,
                    existing,
                    owner,
                });
            }
        }
        Ok(())
    }

    pub fn block_of(&self, segment: SegmentId) -> Option<&AddressBlock> {
        self.blocks.iter().find(|b| b.segment == segment)
    }

    pub fn blocks(&self) -> &[AddressBlock] {
        &self.blocks
    }

    pub fn address_of(&self, device: DeviceId) -> Option<Ipv4Addr> {
        self.interfaces.get(&device).map(|iface| iface.ip())
    }

    /// Address with the on-link prefix length
    pub fn interface(&self, device: DeviceId) -> Option<Ipv4Network> {
        self.interfaces.get(&device).copied()
    }

    pub fn device_for(&self, ip: Ipv4Addr) -> Option<DeviceId> {
        self.by_address.get(&ip).copied()
    }

    pub fn is_addressed(&self, device: DeviceId) -> bool {
        self.interfaces.contains_key(&device)
    }
}

/// Hands out consecutive prefixes of one length: 11.1.1.0/24, 11.1.2.0/24, ...
#[derive(Debug, Clone)]
pub struct PrefixAllocator {
    next: Option<Ipv4Network>,
}

impl PrefixAllocator {
    pub fn new(base: Ipv4Addr, prefix_len: u8) -> Result<Self, AddrError> {
        let first = Ipv4Network::new(base, prefix_len)
            .map_err(|e| AddrError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            next: Some(normalize(first)),
        })
    }

    pub fn next_prefix(&mut self) -> Result<Ipv4Network, AddrError> {
        let current = self
            .next
            .ok_or_else(|| AddrError::InvalidConfig("prefix space exhausted".to_string()))?;
        let step = 1u64 << (32 - current.prefix() as u32);
        let following = u32::from(current.network()) as u64 + step;
        self.next = u32::try_from(following)
            .ok()
            .and_then(|n| Ipv4Network::new(Ipv4Addr::from(n), current.prefix()).ok());
        Ok(current)
    }
}

/// Packet core backhaul space
pub const BACKHAUL_BASE: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 0);

/// The `index`th /30 of the backhaul space (10.0.0.0/16).
///
/// Returns the subnet and its two host addresses.
pub fn backhaul_subnet(index: u16) -> Result<(Ipv4Network, Ipv4Addr, Ipv4Addr), AddrError> {
    // 16384 /30 subnets fit in a /16
    if index >= 16_384 {
        return Err(AddrError::InvalidConfig(format!(
            "Backhaul index {} too high",
            index
        )));
    }
    let base = u32::from(BACKHAUL_BASE) + index as u32 * 4;
    let subnet = Ipv4Network::new(Ipv4Addr::from(base), 30)
        .map_err(|e| AddrError::InvalidConfig(e.to_string()))?;
    Ok((
        subnet,
        Ipv4Addr::from(base + 1),
        Ipv4Addr::from(base + 2),
    ))
}
