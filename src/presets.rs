//! Built-in scenarios
//!
//! Each preset turns a `ScenarioConfig` into a populated `ScenarioBuilder`.
//! Callers may adjust the builder (reachability policy, output paths) before
//! calling `build()`.

use crate::addr::PrefixAllocator;
use crate::cellular::{TrafficTemplate, DEFAULT_GATEWAY};
use crate::link::{FabricError, LinkKind};
use crate::mobility::Vector;
use crate::node::{NodeRole, NodeSet};
use crate::scenario::ScenarioBuilder;
use crate::time::SimTime;
use crate::traffic::{Protocol, SinkSpec, SourceSpec};
use crate::ScenarioError;
use ipnetwork::Ipv4Network;
use scenarios::{Presets, ScenarioConfig};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tracing::info;

pub const DL_PORT: u16 = 1100;
pub const UL_PORT_BASE: u16 = 2001;
pub const PEER_PORT: u16 = 3000;
pub const ECHO_PORT: u16 = 9;
pub const UDP_SERVER_PORT: u16 = 100;

fn prefix(addr: Ipv4Addr, len: u8) -> Result<Ipv4Network, ScenarioError> {
    Ipv4Network::new(addr, len)
        .map_err(|e| ScenarioError::from(crate::addr::AddrError::InvalidConfig(e.to_string())))
}

fn velocity(config: &ScenarioConfig) -> Vector {
    Vector::new(config.velocity.x, config.velocity.y, config.velocity.z)
}

/// Builder for the preset named by `config.name`
pub fn from_config(config: &ScenarioConfig) -> Result<ScenarioBuilder, ScenarioError> {
    config.validate()?;
    let mut builder = match config.name.as_str() {
        Presets::LTE_EPC => lte_epc(config)?,
        Presets::HETNET => hetnet(config)?,
        Presets::BRIDGED_LANS => bridged_lans(config)?,
        other => return Err(ScenarioError::UnknownPreset(other.to_string())),
    };
    if let Some(path) = &config.output.trace_path {
        builder.trace_to(path);
    }
    if let Some(dir) = &config.output.pcap_dir {
        builder.pcap_to(dir);
    }
    Ok(builder)
}

/// Base stations with one mobile each behind a packet core, a remote host
/// on the internet side, and a vehicular segment joining a roadside unit,
/// the remote host and the mobiles.
///
/// Flows per mobile: downlink remote -> mobile:1100, uplink mobile ->
/// remote:2001+i, and with two or more pairs a peer flow to the next mobile
/// on port 3000, each unless disabled.
pub fn lte_epc(config: &ScenarioConfig) -> Result<ScenarioBuilder, ScenarioError> {
    let pairs = config.num_node_pairs as usize;
    let mut b = ScenarioBuilder::new(config.name.clone(), config.links.clone())
        .with_component_carriers(config.component_carriers());

    let enbs = b.create_nodes(NodeRole::BaseStation, pairs);
    let ues = b.create_nodes(NodeRole::MobileStation, pairs);
    let remote = b.create_node(NodeRole::RemoteHost);
    b.install_stack(&NodeSet::single(remote))?;
    b.install_stack(&ues)?;

    let cell = b.install_cellular(&enbs, &ues)?;
    let gateway = b.create_packet_core(cell.segment())?;

    let internet = b.install_point_to_point(gateway, remote, config.links.internet_backhaul.clone())?;
    let internet_addrs = b.assign_addresses(internet.segment(), prefix(Ipv4Addr::new(1, 0, 0, 0), 8)?)?;
    let (gw_internet, remote_addr) = (internet_addrs[0], internet_addrs[1]);
    if let Some(remote_dev) = internet.get(1) {
        b.install_route(remote, prefix(Ipv4Addr::new(7, 0, 0, 0), 8)?, Some(gw_internet), remote_dev)?;
    }

    let roadside = b.create_node(NodeRole::Peer);
    b.install_stack(&NodeSet::single(roadside))?;
    let wave_members = NodeSet::single(roadside)
        .join(&NodeSet::single(remote))
        .join(&ues);
    let wave = b.install_link(LinkKind::Vehicular, &wave_members)?;
    b.assign_addresses(wave.segment(), prefix(Ipv4Addr::new(12, 1, 1, 0), 24)?)?;

    for i in 0..pairs {
        let offset = config.distance_m * i as f64;
        if let (Some(enb), Some(ue)) = (enbs.get(i), ues.get(i)) {
            b.set_position(enb, Vector::new(250.0 + offset, 500.0, 0.0))?;
            b.set_position(ue, Vector::new(offset, 250.0, 0.0))?;
        }
    }
    b.set_position(remote, Vector::new(500.0, 250.0, 0.0))?;
    b.set_position(roadside, Vector::new(250.0, 0.0, 0.0))?;

    let mut ue_addrs = Vec::with_capacity(pairs);
    for i in 0..pairs {
        let (Some(ue), Some(mobile), Some(enb_dev)) =
            (ues.get(i), cell.mobiles.get(i), cell.base_stations.get(i))
        else {
            continue;
        };
        let attached = b.attach(mobile, enb_dev)?;
        let ip = b.assign_mobile_address(&attached)?;
        b.install_default_route(ue, DEFAULT_GATEWAY, mobile)?;
        ue_addrs.push((ue, ip));
    }
    b.activate_bearer(cell.mobiles.as_slice(), config.qos, TrafficTemplate::match_all())?;

    let start = SimTime::from_duration(config.app_start());
    let stop = SimTime::from_duration(config.sim_time());
    let source = |node, dst: SocketAddrV4| {
        SourceSpec::new(node, dst, Protocol::Udp)
            .interval(config.inter_packet_interval())
            .packet_size(config.packet_size)
            .max_packets(config.max_packets)
            .active(start, stop)
    };

    for (i, (ue, ue_ip)) in ue_addrs.iter().enumerate() {
        if !config.disable_dl {
            b.install_sink(SinkSpec::new(*ue, DL_PORT, Protocol::Udp).active(start, stop))?;
            b.install_source(source(remote, SocketAddrV4::new(*ue_ip, DL_PORT)))?;
        }
        if !config.disable_ul {
            let port = UL_PORT_BASE + i as u16;
            b.install_sink(SinkSpec::new(remote, port, Protocol::Udp).active(start, stop))?;
            b.install_source(source(*ue, SocketAddrV4::new(remote_addr, port)))?;
        }
    }
    if !config.disable_pl && ue_addrs.len() > 1 {
        for (i, (ue, _)) in ue_addrs.iter().enumerate() {
            let (peer, peer_ip) = ue_addrs[(i + 1) % ue_addrs.len()];
            b.install_sink(SinkSpec::new(peer, PEER_PORT, Protocol::Udp).active(start, stop))?;
            b.install_source(source(*ue, SocketAddrV4::new(peer_ip, PEER_PORT)))?;
        }
    }

    b.stop_at(stop);
    info!("Preset {} with {} node pairs", config.name, pairs);
    Ok(b)
}

/// Point-to-point backbone between a WLAN access point and a LAN router,
/// a shared-media LAN, a WLAN with two stations that are also cellular
/// mobiles, and a packet core with a remote host.
///
/// An echo client on the moving station talks to the last LAN node over
/// globally populated routes; the remote host streams UDP to the same
/// station over its cellular bearer.
pub fn hetnet(config: &ScenarioConfig) -> Result<ScenarioBuilder, ScenarioError> {
    let mut b = ScenarioBuilder::new(config.name.clone(), config.links.clone())
        .with_component_carriers(config.component_carriers());

    let ap = b.create_node(NodeRole::Peer);
    let router = b.create_node(NodeRole::Peer);
    let backbone: NodeSet = [ap, router].into_iter().collect();
    let lan_hosts = b.create_nodes(NodeRole::Peer, 3);
    let mover = b.create_node(NodeRole::MobileStation);
    let parked = b.create_node(NodeRole::MobileStation);
    let stations: NodeSet = [mover, parked].into_iter().collect();
    let lan = NodeSet::single(router).join(&lan_hosts);
    b.install_stack(&backbone)?;
    b.install_stack(&lan_hosts)?;
    b.install_stack(&stations)?;

    let p2p = b.install_link(LinkKind::PointToPoint, &backbone)?;
    let csma = b.install_link(LinkKind::SharedMedia, &lan)?;
    let wifi = b.install_wireless_lan(&NodeSet::single(ap), &stations)?;

    let mut prefixes = PrefixAllocator::new(Ipv4Addr::new(11, 1, 1, 0), 24)?;
    b.assign_addresses(p2p.segment(), prefixes.next_prefix()?)?;
    let lan_addrs = b.assign_addresses(csma.segment(), prefixes.next_prefix()?)?;
    b.assign_addresses(wifi.stations.segment(), prefixes.next_prefix()?)?;
    b.populate_global_routes()?;

    let remote = b.create_node(NodeRole::RemoteHost);
    b.install_stack(&NodeSet::single(remote))?;
    let bs = b.create_node(NodeRole::BaseStation);
    let cell = b.install_cellular(&NodeSet::single(bs), &stations)?;
    let gateway = b.create_packet_core(cell.segment())?;
    let internet = b.install_point_to_point(gateway, remote, config.links.internet_backhaul.clone())?;
    let internet_addrs = b.assign_addresses(internet.segment(), prefix(Ipv4Addr::new(1, 0, 0, 0), 8)?)?;
    if let Some(remote_dev) = internet.get(1) {
        b.install_route(
            remote,
            prefix(Ipv4Addr::new(7, 0, 0, 0), 8)?,
            Some(internet_addrs[0]),
            remote_dev,
        )?;
    }

    b.set_grid_positions(&lan_hosts, &config.grid)?;
    b.set_position(ap, Vector::new(100.0, 501.0, 0.0))?;
    b.set_velocity(mover, Vector::new(0.0, 500.0, 0.0), velocity(config))?;
    b.set_position(bs, Vector::new(0.0, 500.0, 10.0))?;
    b.set_position(parked, Vector::new(0.0, 510.0, 0.0))?;

    let bs_dev = cell
        .base_stations
        .get(0)
        .ok_or(FabricError::EmptySegment(LinkKind::CellularAccess))?;
    let mut mover_ip = None;
    for mobile in cell.mobiles.iter() {
        let attached = b.attach(mobile, bs_dev)?;
        let ip = b.assign_mobile_address(&attached)?;
        if mover_ip.is_none() {
            mover_ip = Some(ip);
        }
    }
    b.activate_bearer(cell.mobiles.as_slice(), config.qos, TrafficTemplate::match_all())?;

    let stop = SimTime::from_duration(config.sim_time());
    let server_start = SimTime::from_duration(config.app_start());
    let client_start = server_start.plus(Duration::from_secs(1));
    if !config.disable_pl && client_start < stop {
        if let (Some(server), Some(server_ip)) = (lan_hosts.get(2), lan_addrs.last()) {
            b.install_sink(SinkSpec::new(server, ECHO_PORT, Protocol::UdpEcho).active(server_start, stop))?;
            b.install_source(
                SourceSpec::new(mover, SocketAddrV4::new(*server_ip, ECHO_PORT), Protocol::UdpEcho)
                    .interval(config.inter_packet_interval())
                    .packet_size(config.packet_size)
                    .max_packets(config.max_packets)
                    .active(client_start, stop),
            )?;
        }
    }

    let stream_start = server_start.plus(Duration::from_secs(5));
    if !config.disable_dl && stream_start < stop {
        if let Some(ip) = mover_ip {
            b.install_sink(
                SinkSpec::new(mover, UDP_SERVER_PORT, Protocol::Udp).active(stream_start, stop),
            )?;
            b.install_source(
                SourceSpec::new(remote, SocketAddrV4::new(ip, UDP_SERVER_PORT), Protocol::Udp)
                    .interval(Duration::from_millis(4))
                    .packet_size(config.packet_size)
                    .max_packets(200_000)
                    .active(stream_start, stop),
            )?;
        }
    }

    b.stop_at(stop);
    info!("Preset {} with {} LAN hosts", config.name, lan_hosts.len());
    Ok(b)
}

/// Two shared-media LANs joined by a dual-homed node, with static routes
/// through it in both directions and one UDP flow across
pub fn bridged_lans(config: &ScenarioConfig) -> Result<ScenarioBuilder, ScenarioError> {
    let mut b = ScenarioBuilder::new(config.name.clone(), config.links.clone());
    let left = b.create_node(NodeRole::Peer);
    let bridge = b.create_node(NodeRole::Peer);
    let right = b.create_node(NodeRole::Peer);
    let nodes: NodeSet = [left, bridge, right].into_iter().collect();
    b.install_stack(&nodes)?;

    let lan1 = b.install_link(LinkKind::SharedMedia, &[left, bridge].into_iter().collect())?;
    let lan2 = b.install_link(LinkKind::SharedMedia, &[bridge, right].into_iter().collect())?;
    let mut prefixes = PrefixAllocator::new(Ipv4Addr::new(11, 1, 1, 0), 24)?;
    let (p1, p2) = (prefixes.next_prefix()?, prefixes.next_prefix()?);
    let a1 = b.assign_addresses(lan1.segment(), p1)?;
    let a2 = b.assign_addresses(lan2.segment(), p2)?;

    if let (Some(left_dev), Some(right_dev)) = (lan1.get(0), lan2.get(1)) {
        b.install_route(left, p2, Some(a1[1]), left_dev)?;
        b.install_route(right, p1, Some(a2[0]), right_dev)?;
    }

    let start = SimTime::from_duration(config.app_start());
    let stop = SimTime::from_duration(config.sim_time());
    b.install_sink(SinkSpec::new(right, ECHO_PORT, Protocol::Udp).active(start, stop))?;
    b.install_source(
        SourceSpec::new(left, SocketAddrV4::new(a2[1], ECHO_PORT), Protocol::Udp)
            .interval(config.inter_packet_interval())
            .packet_size(config.packet_size)
            .max_packets(config.max_packets)
            .active(start, stop),
    )?;
    b.stop_at(stop);
    Ok(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_preset() {
        let config = ScenarioConfig {
            name: "satellite".to_string(),
            ..ScenarioConfig::default()
        };
        assert!(matches!(
            from_config(&config),
            Err(ScenarioError::UnknownPreset(name)) if name == "satellite"
        ));
    }

    #[test]
    fn test_every_preset_builds() {
        for info in Presets::all() {
            let config = Presets::config(info.name).unwrap();
            let builder = from_config(&config).unwrap();
            assert!(builder.build().is_ok(), "{} failed to build", info.name);
        }
    }

    #[test]
    fn test_lte_epc_flows_follow_flags() {
        let config = ScenarioConfig {
            num_node_pairs: 2,
            disable_dl: true,
            ..ScenarioConfig::default()
        };
        let builder = from_config(&config).unwrap();
        // Two uplink pairs and two peer pairs
        assert_eq!(builder.traffic().apps().len(), 8);
        assert_eq!(builder.topology().cellular().bearers().len(), 2);

        let config = ScenarioConfig {
            disable_dl: true,
            disable_pl: true,
            ..ScenarioConfig::default()
        };
        let builder = from_config(&config).unwrap();
        assert_eq!(builder.traffic().apps().len(), 2);
    }

    #[test]
    fn test_carrier_aggregation_scales_radio() {
        let config = ScenarioConfig {
            use_ca: true,
            ..ScenarioConfig::default()
        };
        let builder = from_config(&config).unwrap();
        let fabric = builder.topology().fabric();
        let cell = fabric
            .segments()
            .iter()
            .find(|s| s.kind == LinkKind::CellularAccess)
            .unwrap();
        assert_eq!(cell.profile.data_rate_bps, 50_000_000);
    }
}
