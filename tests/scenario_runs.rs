//! End-to-end runs of built-in and hand-built scenarios
//!
//! These drive full scenarios through the default engine and check delivered
//! traffic, setup failures and output files.

use hetnet::addr::PrefixAllocator;
use hetnet::cellular::{AttachState, TrafficTemplate, DEFAULT_GATEWAY};
use hetnet::link::LinkKind;
use hetnet::presets::{self, ECHO_PORT};
use hetnet::trace::{self, events};
use hetnet::traffic::{AppKind, Protocol, SinkSpec, SourceSpec};
use hetnet::{
    DropReason, ErrorKind, NodeRole, NodeSet, QosClass, ReachabilityPolicy, ScenarioBuilder,
    ScenarioConfig, ScenarioError, SimTime,
};
use scenarios::{LinkProfiles, Presets};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("hetnet=debug")
        .with_test_writer()
        .try_init();
}

/// Two LANs joined by a dual-homed node, optionally without the static routes
fn bridged(with_routes: bool) -> ScenarioBuilder {
    let mut b = ScenarioBuilder::new("bridged", LinkProfiles::default());
    let left = b.create_node(NodeRole::Peer);
    let bridge = b.create_node(NodeRole::Peer);
    let right = b.create_node(NodeRole::Peer);
    b.install_stack(&[left, bridge, right].into_iter().collect())
        .unwrap();

    let lan1 = b
        .install_link(LinkKind::SharedMedia, &[left, bridge].into_iter().collect())
        .unwrap();
    let lan2 = b
        .install_link(LinkKind::SharedMedia, &[bridge, right].into_iter().collect())
        .unwrap();
    let mut prefixes = PrefixAllocator::new(Ipv4Addr::new(11, 1, 1, 0), 24).unwrap();
    let p1 = prefixes.next_prefix().unwrap();
    let p2 = prefixes.next_prefix().unwrap();
    let a1 = b.assign_addresses(lan1.segment(), p1).unwrap();
    let a2 = b.assign_addresses(lan2.segment(), p2).unwrap();
    if with_routes {
        b.install_route(left, p2, Some(a1[1]), lan1.get(0).unwrap())
            .unwrap();
        b.install_route(right, p1, Some(a2[0]), lan2.get(1).unwrap())
            .unwrap();
    }

    let start = SimTime::from_secs(1);
    let stop = SimTime::from_secs(10);
    b.install_sink(SinkSpec::new(right, ECHO_PORT, Protocol::Udp).active(start, stop))
        .unwrap();
    b.install_source(
        SourceSpec::new(left, SocketAddrV4::new(a2[1], ECHO_PORT), Protocol::Udp)
            .interval(Duration::from_secs(1))
            .max_packets(5)
            .active(start, stop),
    )
    .unwrap();
    b.stop_at(stop);
    b
}

#[test]
fn test_bridged_lans_deliver_every_packet() {
    init_logging();

    let report = bridged(true).build().unwrap().run_default().unwrap();
    let sink = report
        .apps
        .iter()
        .find(|a| a.kind == AppKind::PacketSink)
        .unwrap();
    assert_eq!(sink.stats.received, 5);
    assert_eq!(sink.stats.lost, 0);
    assert_eq!(report.total_drops(), 0);
    assert!(report.unreachable.is_empty());
}

#[test]
fn test_missing_route_under_warn_delivers_nothing() {
    init_logging();

    let mut builder = bridged(false);
    builder.reachability(ReachabilityPolicy::Warn);
    let scenario = builder.build().unwrap();
    assert_eq!(scenario.unreachable().len(), 1);
    assert_eq!(scenario.unreachable()[0].reason, DropReason::NoRoute);

    let report = scenario.run_default().unwrap();
    assert_eq!(report.total_received(), 0);
    assert_eq!(report.drops.get(&DropReason::NoRoute), Some(&5));
    assert!(report.to_string().contains("unreachable"));
}

#[test]
fn test_missing_route_under_enforce_fails_build() {
    init_logging();

    match bridged(false).build() {
        Err(ScenarioError::Unreachable { reason, destination, .. }) => {
            assert_eq!(reason, DropReason::NoRoute);
            assert_eq!(destination, SocketAddrV4::new(Ipv4Addr::new(11, 1, 2, 2), ECHO_PORT));
        }
        other => panic!("expected unreachable, got {:?}", other.map(|s| s.name().to_string())),
    }
}

#[test]
fn test_lte_uplink_only() {
    init_logging();

    let config = ScenarioConfig {
        disable_dl: true,
        disable_pl: true,
        ..ScenarioConfig::default()
    };
    let report = presets::from_config(&config)
        .unwrap()
        .build()
        .unwrap()
        .run_default()
        .unwrap();

    assert_eq!(report.bearers.len(), 1);
    assert_eq!(report.bearers[0].eps_id, 5);
    let sink = report
        .apps
        .iter()
        .find(|a| a.kind == AppKind::PacketSink)
        .unwrap();
    assert_eq!(sink.node, "remote0");
    assert!(sink.stats.received > 0);
    assert!(sink.stats.received <= 1000);
    assert!(sink.stats.first_rx.unwrap() >= SimTime::from_millis(500));
    assert_eq!(report.total_drops(), 0);
}

#[test]
fn test_lte_all_directions_with_two_pairs() {
    init_logging();

    let config = ScenarioConfig {
        num_node_pairs: 2,
        ..ScenarioConfig::default()
    };
    let report = presets::from_config(&config)
        .unwrap()
        .build()
        .unwrap()
        .run_default()
        .unwrap();

    assert_eq!(report.bearers.len(), 2);
    let sinks: Vec<_> = report
        .apps
        .iter()
        .filter(|a| a.kind == AppKind::PacketSink)
        .collect();
    // Downlink, uplink and peer sink per pair
    assert_eq!(sinks.len(), 6);
    for sink in sinks {
        assert!(sink.stats.received > 0, "{} on {} got nothing", sink.id, sink.node);
    }
    assert_eq!(report.total_drops(), 0);
}

#[test]
fn test_hetnet_echo_over_global_routes() {
    init_logging();

    let mut config = Presets::config(Presets::HETNET).unwrap();
    config.disable_dl = true;
    let report = presets::from_config(&config)
        .unwrap()
        .build()
        .unwrap()
        .run_default()
        .unwrap();

    let client = report
        .apps
        .iter()
        .find(|a| a.kind == AppKind::EchoClient)
        .unwrap();
    assert_eq!(client.node, "ms0");
    assert!(client.stats.sent > 0);
    assert_eq!(client.stats.echo_replies, client.stats.sent);
    assert!(client.stats.rtt_mean_ns.unwrap() > 0);

    let server = report
        .apps
        .iter()
        .find(|a| a.kind == AppKind::EchoServer)
        .unwrap();
    assert_eq!(server.node, "peer4");
    assert_eq!(server.stats.received, client.stats.sent);

    // 5 m/s along x for 20 s
    let moved = report.positions.get("ms0").unwrap();
    assert!((moved.x - 100.0).abs() < 1e-9);
    assert!((moved.y - 500.0).abs() < 1e-9);
}

#[test]
fn test_hetnet_downlink_stream() {
    init_logging();

    let mut config = Presets::config(Presets::HETNET).unwrap();
    config.disable_pl = true;
    config.sim_time_ms = 7_000;
    let report = presets::from_config(&config)
        .unwrap()
        .build()
        .unwrap()
        .run_default()
        .unwrap();

    let sink = report
        .apps
        .iter()
        .find(|a| a.kind == AppKind::PacketSink)
        .unwrap();
    assert_eq!(sink.port, presets::UDP_SERVER_PORT);
    // One second of 4 ms spacing, starting 6 s in
    assert!(sink.stats.received >= 240);
    assert!(sink.stats.first_rx.unwrap() >= SimTime::from_secs(6));
}

#[test]
fn test_trace_and_pcap_output() {
    init_logging();

    let dir = tempfile::tempdir().unwrap();
    let trace_path = dir.path().join("run.jsonl");
    let pcap_dir = dir.path().join("pcap");

    let mut config = Presets::config(Presets::BRIDGED_LANS).unwrap();
    config.output.trace_path = Some(trace_path.clone());
    config.output.pcap_dir = Some(pcap_dir.clone());
    let scenario = presets::from_config(&config).unwrap().build().unwrap();
    assert_eq!(scenario.trace_path(), Some(trace_path.as_path()));
    let report = scenario.run_default().unwrap();

    let entries = trace::read_trace(&trace_path).unwrap();
    assert_eq!(entries.len() as u64, report.trace_entries);
    let received = entries
        .iter()
        .filter(|e| e.event_type == events::PACKET_RX)
        .count();
    assert_eq!(received, 5);
    assert!(entries.windows(2).all(|w| w[0].time() <= w[1].time()));

    let mut captures: Vec<_> = std::fs::read_dir(&pcap_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    captures.sort();
    assert_eq!(captures.len(), 4);
    for path in &captures {
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("bridged-lans-"), "unexpected file {}", name);
        assert!(name.ends_with(".pcap"));
        assert!(std::fs::metadata(path).unwrap().len() >= 24);
    }
    // The receiver's LAN device saw every packet
    let receiver = captures
        .iter()
        .find(|p| p.to_string_lossy().contains("-peer2-"))
        .unwrap();
    assert_eq!(std::fs::metadata(receiver).unwrap().len(), 24 + 5 * (16 + 96));
}

#[test]
fn test_runs_are_deterministic() {
    init_logging();

    let config = ScenarioConfig {
        num_node_pairs: 3,
        ..ScenarioConfig::default()
    };
    let scenario = presets::from_config(&config).unwrap().build().unwrap();
    let first = scenario.run_default().unwrap();
    let second = scenario.run_default().unwrap();
    assert_eq!(first, second);

    let rebuilt = presets::from_config(&config)
        .unwrap()
        .build()
        .unwrap()
        .run_default()
        .unwrap();
    assert_eq!(first, rebuilt);
}

#[test]
fn test_bearer_activation_is_all_or_nothing() {
    init_logging();

    let mut b = ScenarioBuilder::new("bearers", LinkProfiles::default());
    let enbs = b.create_nodes(NodeRole::BaseStation, 1);
    let ues = b.create_nodes(NodeRole::MobileStation, 2);
    b.install_stack(&ues).unwrap();
    let cell = b.install_cellular(&enbs, &ues).unwrap();
    b.create_packet_core(cell.segment()).unwrap();

    let first = cell.mobiles.get(0).unwrap();
    let second = cell.mobiles.get(1).unwrap();
    let attached = b.attach(first, cell.base_stations.get(0).unwrap()).unwrap();
    b.assign_mobile_address(&attached).unwrap();

    let err = b
        .activate_bearer(&[first, second], QosClass::default(), TrafficTemplate::match_all())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BearerActivation);
    assert!(b.topology().cellular().bearers().is_empty());
    assert!(matches!(
        b.topology().cellular().state(first),
        AttachState::Attached { .. }
    ));
    assert_eq!(b.topology().cellular().state(second), AttachState::Unattached);

    let bearers = b
        .activate_bearer(&[first], QosClass::default(), TrafficTemplate::match_all())
        .unwrap();
    assert_eq!(bearers.len(), 1);
}

#[test]
fn test_every_node_set_shape_is_accepted() {
    init_logging();

    let mut b = ScenarioBuilder::new("shapes", LinkProfiles::default());
    let nodes = b.create_nodes(NodeRole::Peer, 4);
    b.install_stack(&nodes).unwrap();
    for kind in ["csma", "wifi", "wave"] {
        let group = b.install_link_by_tag(kind, &nodes).unwrap();
        assert_eq!(group.len(), 4);
    }
    let err = b
        .install_link_by_tag("p2p", &nodes)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    let err = b.install_link_by_tag("dsl", &NodeSet::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedLinkKind);
}

/// One packet across a single LAN with the sink closing at `sink_stop`
fn single_lan_packet(sink_stop: SimTime) -> ScenarioBuilder {
    let mut b = ScenarioBuilder::new("single-lan", LinkProfiles::default());
    let nodes = b.create_nodes(NodeRole::Peer, 2);
    b.install_stack(&nodes).unwrap();
    let lan = b.install_link(LinkKind::SharedMedia, &nodes).unwrap();
    let prefix = "11.2.0.0/24".parse().unwrap();
    let addrs = b.assign_addresses(lan.segment(), prefix).unwrap();

    let start = SimTime::from_secs(1);
    let sink = nodes.get(1).unwrap();
    b.install_sink(SinkSpec::new(sink, ECHO_PORT, Protocol::Udp).active(start, sink_stop))
        .unwrap();
    b.install_source(
        SourceSpec::new(nodes.get(0).unwrap(), SocketAddrV4::new(addrs[1], ECHO_PORT), Protocol::Udp)
            .packet_size(972)
            .max_packets(1)
            .active(start, SimTime::from_secs(2)),
    )
    .unwrap();
    b.stop_at(SimTime::from_secs(2));
    b
}

#[test]
fn test_sink_accepts_arrival_at_its_stop_instant() {
    init_logging();

    let open = single_lan_packet(SimTime::from_secs(2))
        .build()
        .unwrap()
        .run_default()
        .unwrap();
    let arrival = open
        .apps
        .iter()
        .find(|a| a.kind == AppKind::PacketSink)
        .and_then(|a| a.stats.first_rx)
        .unwrap();
    assert!(arrival > SimTime::from_secs(1));

    let report = single_lan_packet(arrival)
        .build()
        .unwrap()
        .run_default()
        .unwrap();
    let sink = report
        .apps
        .iter()
        .find(|a| a.kind == AppKind::PacketSink)
        .unwrap();
    assert_eq!(sink.stats.received, 1);
    assert_eq!(sink.stats.first_rx, Some(arrival));
    assert_eq!(report.total_drops(), 0);
}

/// The LTE preset plus two peers on a LAN of their own with no routes out
fn lte_with_isolated_lan() -> (ScenarioBuilder, NodeSet) {
    let config = ScenarioConfig {
        disable_pl: true,
        ..ScenarioConfig::default()
    };
    let mut b = presets::from_config(&config).unwrap();
    let strays = b.create_nodes(NodeRole::Peer, 2);
    b.install_stack(&strays).unwrap();
    let lan = b.install_link(LinkKind::SharedMedia, &strays).unwrap();
    b.assign_addresses(lan.segment(), "11.9.0.0/24".parse().unwrap())
        .unwrap();
    (b, strays)
}

#[test]
fn test_node_cut_off_from_core_fails_build() {
    init_logging();

    let (builder, strays) = lte_with_isolated_lan();
    let err = builder.build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    match err {
        ScenarioError::NodeUnreachable { node, destination, reason } => {
            assert_eq!(node, strays.get(0).unwrap());
            assert_eq!(destination, DEFAULT_GATEWAY);
            assert_eq!(reason, DropReason::NoRoute);
        }
        other => panic!("expected a stranded node, got {}", other),
    }
}

#[test]
fn test_node_cut_off_from_core_under_warn_is_reported() {
    init_logging();

    let (mut builder, strays) = lte_with_isolated_lan();
    builder.reachability(ReachabilityPolicy::Warn);
    let scenario = builder.build().unwrap();
    let stranded: Vec<_> = scenario.stranded().iter().map(|s| s.node).collect();
    assert_eq!(stranded, strays.as_slice());
    assert!(scenario.unreachable().is_empty());

    let report = scenario.run_default().unwrap();
    assert_eq!(report.stranded.len(), 2);
    assert!(report.total_received() > 0);
    assert!(report.to_string().contains("stranded"));
}
